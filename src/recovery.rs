//! Rebuilding a replica's state from disk.

use parking_lot::Mutex;
use slog::{info, trace, warn};

use crate::data_tree::DataTree;
use crate::snapshot::SnapshotStore;
use crate::txn_log::TxnLog;
use crate::{error, ReplicaConfig, Zxid};

/// Where a replica is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryState {
    /// Not running: either never started, shut down, or recovery failed.
    Stopped,
    /// Reading the newest usable snapshot.
    Loading,
    /// Re-applying log entries past the snapshot.
    Replaying,
    /// Caught up with its own disk and accepting operations.
    Serving,
}

/// Moves `state` along and says so in the log.
pub(crate) fn transition(state: &Mutex<RecoveryState>, to: RecoveryState, logger: &slog::Logger) {
    let mut state = state.lock();
    let from = *state;
    if from != to {
        info!(logger, "replica state changed"; "from" => ?from, "to" => ?to);
        *state = to;
    }
}

/// What [`recover`] rebuilt.
pub(crate) struct Recovered {
    pub(crate) tree: DataTree,
    pub(crate) log: TxnLog,
    /// The zxid of the snapshot recovery started from.
    pub(crate) snapshot: Zxid,
    pub(crate) replayed: usize,
}

/// Loads the newest valid snapshot, then replays every logged entry past it.
///
/// Every entry after the snapshot must follow its predecessor without a hole; otherwise the
/// replica would serve a state no other replica ever had, so recovery fails with
/// [`error::Recovery::LogGapDetected`]. The caller is expected to stop the replica on any error.
pub(crate) fn recover(
    config: &ReplicaConfig,
    store: &SnapshotStore,
    state: &Mutex<RecoveryState>,
    logger: &slog::Logger,
) -> Result<Recovered, failure::Error> {
    transition(state, RecoveryState::Loading, logger);
    let mut tree = match store.load_latest()? {
        Some(tree) => tree,
        None => {
            info!(logger, "no snapshot; starting from an empty tree");
            DataTree::new()
        }
    };
    let snapshot = tree.last_zxid();
    let mut log = TxnLog::open(config)?;

    transition(state, RecoveryState::Replaying, logger);
    if log.last_zxid() < snapshot {
        // everything the log holds is already in the snapshot
        warn!(logger, "log ends before the snapshot; restarting it there";
              "log_last" => %log.last_zxid(), "snapshot" => %snapshot);
        log.reset(snapshot)?;
    } else if log.base() > snapshot {
        let found = match log.read_from(Zxid::ZERO).next() {
            Some(entry) => entry?.zxid,
            None => log.base(),
        };
        return Err(error::Recovery::LogGapDetected {
            after: snapshot,
            found,
        }
        .into());
    }

    let mut prev = snapshot;
    let mut replayed = 0;
    for entry in log.read_from(snapshot.after()) {
        let entry = entry?;
        if !entry.zxid.follows(prev) {
            return Err(error::Recovery::LogGapDetected {
                after: prev,
                found: entry.zxid,
            }
            .into());
        }
        tree.apply(&entry)?;
        trace!(logger, "replayed"; "zxid" => %entry.zxid);
        prev = entry.zxid;
        replayed += 1;
    }

    info!(logger, "recovered";
          "snapshot" => %snapshot, "replayed" => replayed, "last_zxid" => %tree.last_zxid());
    Ok(Recovered {
        tree,
        log,
        snapshot,
        replayed,
    })
}
