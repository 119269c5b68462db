mod multi;
pub use self::multi::*;

mod watch;
pub use self::watch::*;

mod zxid;
pub use self::zxid::Zxid;

/// Statistics about a znode, similar to the UNIX `stat` structure.
///
/// # Time in the keeper
/// The concept of time is tricky in distributed systems. The keeper tracks time in a number of
/// ways.
///
/// - **zxid**: Every committed change receives a stamp in the form of a *zxid* (transaction ID).
///   This exposes the total ordering of all changes. If *zxid:a* is smaller than *zxid:b*, then
///   the change stamped *zxid:a* was applied before the one stamped *zxid:b* on every replica.
/// - **Version Numbers**: Every change to a znode increases exactly one of its version numbers by
///   exactly one.
/// - **Clock Time**: `ctime` and `mtime` are wall-clock stamps chosen by the leader when it
///   proposed the change. They travel inside the log entry, so replay reproduces them exactly.
///
/// `data_length` and `num_children` are never stored; they are computed from the node when the
/// `Stat` is built, so they always agree with the node's payload and child set.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Stat {
    /// The transaction ID that created the znode.
    pub czxid: i64,
    /// The last transaction that modified the data of the znode.
    pub mzxid: i64,
    /// Milliseconds since epoch when the znode was created.
    pub ctime: i64,
    /// Milliseconds since epoch when the znode was last modified.
    pub mtime: i64,
    /// The number of changes to the data of the znode.
    pub version: i32,
    /// The number of changes to the children of the znode.
    pub cversion: i32,
    /// The number of changes to the ACL of the znode. ACLs are not enforced, so this stays 0.
    pub aversion: i32,
    /// The session ID of the owner of this znode, if it is an ephemeral entry, or 0.
    pub ephemeral_owner: i64,
    /// The length of the data field of the znode.
    pub data_length: i32,
    /// The number of children this znode has.
    pub num_children: i32,
    /// The transaction ID that last modified the children of the znode.
    pub pzxid: i64,
}

/// CreateMode value determines how the znode is created.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMode {
    /// The znode will not be automatically deleted when its creator's session ends.
    Persistent = 0,
    /// The znode will be deleted when the creating session is closed.
    Ephemeral = 1,
    /// The name of the znode will be appended with a monotonically increasing number. The
    /// sequence number is the parent's `cversion` at creation time, zero-padded to 10 digits.
    PersistentSequential = 2,
    /// The znode will be deleted when the creating session is closed, and its name will be
    /// appended with a monotonically increasing number.
    EphemeralSequential = 3,
    //
    // 21
    // 00
    // ^---- is it sequential?
    //  ^--- is it ephemeral?
}

impl CreateMode {
    /// True if nodes created with this mode are bound to their session.
    pub fn is_ephemeral(self) -> bool {
        self as i32 & 1 != 0
    }

    /// True if nodes created with this mode get a sequence suffix.
    pub fn is_sequential(self) -> bool {
        self as i32 & 2 != 0
    }

    pub(crate) fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(CreateMode::Persistent),
            1 => Some(CreateMode::Ephemeral),
            2 => Some(CreateMode::PersistentSequential),
            3 => Some(CreateMode::EphemeralSequential),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mode_flags() {
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(!CreateMode::Persistent.is_sequential());
        assert!(CreateMode::Ephemeral.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(!CreateMode::PersistentSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert_eq!(CreateMode::from_code(3), Some(CreateMode::EphemeralSequential));
        assert_eq!(CreateMode::from_code(4), None);
    }
}
