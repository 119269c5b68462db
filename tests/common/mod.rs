#![allow(dead_code)]

use slog::{o, Drain};
use std::collections::BTreeMap;
use tempfile::TempDir;
use tokio_keeper::{Ensemble, ReplicaConfig, Replica, SnapshotMode, Stat};

/// Logs to the terminal when `KEEPER_TEST_LOG` is set.
pub fn logger() -> slog::Logger {
    if std::env::var_os("KEEPER_TEST_LOG").is_none() {
        return slog::Logger::root(slog::Discard, o!());
    }
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!())
}

/// Three replicas with small segments and frequent snapshots, so that tests cross every
/// rotation, snapshot and compaction boundary.
pub fn configs(dir: &TempDir, mode: SnapshotMode, log: &slog::Logger) -> Vec<ReplicaConfig> {
    (1..=3)
        .map(|id| {
            let mut config = ReplicaConfig::new(id, dir.path().join(format!("replica-{}", id)));
            config
                .set_snapshot_mode(mode)
                .set_snapshot_distance(7)
                .set_max_stored_snapshots(2)
                .set_snapshot_batch_size(4)
                .set_log_segment_entries(5)
                .set_logger(log.clone());
            config
        })
        .collect()
}

pub async fn start(dir: &TempDir, mode: SnapshotMode) -> Ensemble {
    let log = logger();
    Ensemble::start(configs(dir, mode, &log), log).await.unwrap()
}

/// Every node except the root, with its data and stat.
pub type Dump = BTreeMap<String, (Vec<u8>, Stat)>;

pub fn dump(replica: &Replica) -> Dump {
    replica
        .view()
        .iter()
        .filter(|(path, _)| *path != "/")
        .map(|(path, node)| (path.to_owned(), (node.data().to_vec(), node.stat())))
        .collect()
}
