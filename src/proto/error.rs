/// Result codes produced by the applier, numbered as on the ZooKeeper wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum ZkError {
    /// Everything is OK. Inside a failed `multi` batch, this marks a member that succeeded on its own
    /// but was rolled back because another member failed.
    Ok = 0,
    /// A runtime inconsistency was found. Inside a failed `multi` batch, this marks a member that was
    /// never attempted because an earlier member failed.
    RuntimeInconsistency = -2,
    /// A data inconsistency was found.
    DataInconsistency = -3,
    /// Error while marshalling or unmarshalling data.
    MarshallingError = -5,
    /// Invalid arguments, such as a malformed path.
    BadArguments = -8,
    /// Attempted to read or modify a node that does not exist.
    NoNode = -101,
    /// Version conflict in a conditional operation.
    BadVersion = -103,
    /// Ephemeral nodes may not have children.
    NoChildrenForEphemerals = -108,
    /// Request to create node that already exists.
    NodeExists = -110,
    /// The node has children.
    NotEmpty = -111,
    /// The session does not exist (anymore).
    SessionExpired = -112,
}

impl ZkError {
    /// The numeric wire code.
    pub fn code(self) -> i32 {
        self as i32
    }
}
