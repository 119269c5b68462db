use failure::Fail;

use crate::Zxid;

/// Errors that may cause a delete request to fail.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Fail)]
pub enum Delete {
    /// No node exists with the given `path`.
    #[fail(display = "target node does not exist")]
    NoNode,

    /// The target node has a different version than was specified by the call to delete.
    #[fail(
        display = "target node has different version than expected ({})",
        expected
    )]
    VersionMismatch {
        /// The expected node version.
        expected: i32,
    },

    /// The target node has child nodes, and therefore cannot be deleted.
    #[fail(display = "target node has children, and cannot be deleted")]
    NotEmpty,

    /// The given path is malformed, or names the root.
    #[fail(display = "invalid path")]
    BadArguments,
}

/// Errors that may cause a `set_data` request to fail.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Fail)]
pub enum SetData {
    /// No node exists with the given `path`.
    #[fail(display = "target node does not exist")]
    NoNode,

    /// The target node has a different version than was specified by the call to `set_data`.
    #[fail(
        display = "target node has different version than expected ({})",
        expected
    )]
    VersionMismatch {
        /// The expected node version.
        expected: i32,
    },

    /// The given path is malformed.
    #[fail(display = "invalid path")]
    BadArguments,
}

/// Errors that may cause a create request to fail.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Fail)]
pub enum Create {
    /// A node with the given `path` already exists.
    #[fail(display = "target node already exists")]
    NodeExists,

    /// The parent node of the given `path` does not exist.
    #[fail(display = "parent node of target does not exist")]
    NoParent,

    /// The parent node of the given `path` is ephemeral, and cannot have children.
    #[fail(display = "parent node is ephemeral, and cannot have children")]
    NoChildrenForEphemerals,

    /// The given path is malformed.
    #[fail(display = "invalid path")]
    BadArguments,

    /// An ephemeral node was requested by a session that is not open.
    #[fail(display = "owning session does not exist")]
    SessionExpired,
}

/// Errors that may cause a `check` request to fail.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Fail)]
pub enum Check {
    /// No node exists with the given `path`.
    #[fail(display = "target node does not exist")]
    NoNode,

    /// The target node has a different version than was specified by the call to `check`.
    #[fail(
        display = "target node has different version than expected ({})",
        expected
    )]
    VersionMismatch {
        /// The expected node version.
        expected: i32,
    },

    /// The given path is malformed.
    #[fail(display = "invalid path")]
    BadArguments,
}

/// Errors that may cause a `close_session` request to fail.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Fail)]
pub enum CloseSession {
    /// The session was never opened, or has already been closed.
    #[fail(display = "session does not exist")]
    SessionExpired,
}

/// The result of a failed `multi` request.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Fail)]
pub enum Multi {
    /// A failed `delete` request.
    #[fail(display = "delete failed: {}", _0)]
    Delete(Delete),

    /// A failed `set_data` request.
    #[fail(display = "set_data failed: {}", _0)]
    SetData(SetData),

    /// A failed `create` request.
    #[fail(display = "create failed: {}", _0)]
    Create(Create),

    /// A failed `check` request.
    #[fail(display = "check failed: {}", _0)]
    Check(Check),

    /// The request would have succeeded, but a later request in the `multi`
    /// batch failed and caused this request to get rolled back.
    #[fail(display = "request rolled back due to later failed request")]
    RolledBack,

    /// The request was skipped because an earlier request in the `multi` batch
    /// failed. It is unknown whether this request would have succeeded.
    #[fail(display = "request failed due to earlier failed request")]
    Skipped,
}

impl From<Delete> for Multi {
    fn from(err: Delete) -> Self {
        Multi::Delete(err)
    }
}

impl From<SetData> for Multi {
    fn from(err: SetData) -> Self {
        Multi::SetData(err)
    }
}

impl From<Create> for Multi {
    fn from(err: Create) -> Self {
        Multi::Create(err)
    }
}

impl From<Check> for Multi {
    fn from(err: Check) -> Self {
        Multi::Check(err)
    }
}

/// Reasons a commit attempt is abandoned before any replica applies it.
///
/// These surface as the outer `failure::Error` of a mutating call. A caller that retries gets a
/// new attempt with a new zxid.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum Commit {
    /// The transaction log could not durably persist the entry.
    #[fail(display = "log append failed at {}: {}", zxid, reason)]
    LogAppendFailure {
        /// The zxid that was being appended.
        zxid: Zxid,
        /// What the storage layer reported.
        reason: String,
    },

    /// Fewer than a majority of replicas acknowledged the entry.
    #[fail(display = "quorum lost ({} of {} needed acknowledgements)", acks, needed)]
    QuorumLost {
        /// Replicas that acknowledged.
        acks: usize,
        /// Replicas required for a majority.
        needed: usize,
    },

    /// The replica has not finished recovery, or has been shut down.
    #[fail(display = "replica is not serving")]
    NotServing,

    /// The entry does not directly follow the last one in the log.
    #[fail(display = "entry {} does not follow {}", got, last)]
    OutOfOrder {
        /// The last zxid already present.
        last: Zxid,
        /// The zxid that was offered.
        got: Zxid,
    },
}

/// Fatal problems found while rebuilding a replica from disk.
///
/// A replica that hits any of these never starts serving.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum Recovery {
    /// A snapshot file failed its integrity checks.
    #[fail(display = "snapshot {} is corrupt: {}", file, reason)]
    SnapshotCorrupt {
        /// The offending file.
        file: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Snapshot files exist, but none of them could be loaded.
    #[fail(display = "none of the {} stored snapshots is valid", tried)]
    NoValidSnapshot {
        /// How many files were tried.
        tried: usize,
    },

    /// The log does not continue where the previous state left off.
    #[fail(display = "log gap: {} does not follow {}", found, after)]
    LogGapDetected {
        /// The last zxid known to be applied.
        after: Zxid,
        /// The next zxid actually found.
        found: Zxid,
    },

    /// A log record failed its checksum, or could not be decoded.
    #[fail(display = "log segment {} is corrupt at offset {}: {}", file, offset, reason)]
    LogCorrupt {
        /// The offending segment file.
        file: String,
        /// Byte offset of the bad record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },
}
