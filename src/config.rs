use slog::o;
use std::path::{Path, PathBuf};

/// How a replica produces snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Serialize the tree while holding it, blocking new commits until the file is durable.
    Sync,
    /// Take a copy-on-write view of the tree at the boundary and serialize it on a blocking task
    /// while commits continue.
    Async,
}

impl Default for SnapshotMode {
    fn default() -> Self {
        SnapshotMode::Async
    }
}

/// Per-replica settings.
///
/// ```no_run
/// # use tokio_keeper::{ReplicaConfig, SnapshotMode};
/// let mut config = ReplicaConfig::new(1, "/var/lib/keeper/1");
/// config
///     .set_snapshot_mode(SnapshotMode::Sync)
///     .set_snapshot_distance(1000);
/// ```
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    pub(crate) id: u64,
    pub(crate) data_dir: PathBuf,
    pub(crate) snapshot_mode: SnapshotMode,
    pub(crate) snapshot_distance: u64,
    pub(crate) max_stored_snapshots: usize,
    pub(crate) snapshot_batch_size: usize,
    pub(crate) log_segment_entries: usize,
    pub(crate) force_sync: bool,
    pub(crate) logger: slog::Logger,
}

impl ReplicaConfig {
    /// Settings for replica `id`, keeping all of its state under `data_dir`.
    pub fn new(id: u64, data_dir: impl AsRef<Path>) -> Self {
        ReplicaConfig {
            id,
            data_dir: data_dir.as_ref().to_path_buf(),
            snapshot_mode: SnapshotMode::default(),
            snapshot_distance: 10_000,
            max_stored_snapshots: 5,
            snapshot_batch_size: 10_000,
            log_segment_entries: 100_000,
            force_sync: true,
            logger: slog::Logger::root(slog::Discard, o!()),
        }
    }

    /// Choose between synchronous and asynchronous snapshots.
    pub fn set_snapshot_mode(&mut self, mode: SnapshotMode) -> &mut Self {
        self.snapshot_mode = mode;
        self
    }

    /// Number of applied entries between automatic snapshots. Zero disables them.
    pub fn set_snapshot_distance(&mut self, distance: u64) -> &mut Self {
        self.snapshot_distance = distance;
        self
    }

    /// How many snapshot files to keep. At least one is always kept.
    pub fn set_max_stored_snapshots(&mut self, n: usize) -> &mut Self {
        self.max_stored_snapshots = n.max(1);
        self
    }

    /// Number of nodes per checksummed batch in a snapshot file.
    pub fn set_snapshot_batch_size(&mut self, n: usize) -> &mut Self {
        self.snapshot_batch_size = n.max(1);
        self
    }

    /// Number of entries after which the log rolls over to a new segment file.
    pub fn set_log_segment_entries(&mut self, n: usize) -> &mut Self {
        self.log_segment_entries = n.max(1);
        self
    }

    /// Whether every log append is fsynced before it is acknowledged.
    pub fn set_force_sync(&mut self, force: bool) -> &mut Self {
        self.force_sync = force;
        self
    }

    /// Set the logger that should be used internally in the replica.
    ///
    /// By default, all logging is disabled. See also [the `slog`
    /// documentation](https://docs.rs/slog).
    pub fn set_logger(&mut self, l: slog::Logger) -> &mut Self {
        self.logger = l;
        self
    }

    /// The replica id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The directory holding this replica's state.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(crate) fn log_dir(&self) -> PathBuf {
        self.data_dir.join("raft_log")
    }

    pub(crate) fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("raft_snapshot")
    }
}
