//! Durable point-in-time images of the data tree.

use slog::{debug, info, o, warn};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::data_tree::{DataTree, TreeView};
use crate::txn_log::sync_dir;
use crate::{error, ReplicaConfig, Zxid};

mod engine;
mod format;

pub(crate) use self::engine::{Manual, SnapshotEngine};

const TMP_SUFFIX: &str = ".tmp";

fn file_name(zxid: Zxid) -> String {
    format!("snapshot_{:016x}.snap", zxid.raw())
}

fn parse_file_name(name: &str) -> Option<Zxid> {
    let hex = name.strip_prefix("snapshot_")?.strip_suffix(".snap")?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok().map(Zxid::from_raw)
}

/// The snapshot directory of one replica.
///
/// Files are named after the zxid they cover and are never rewritten: a snapshot is written to
/// a temporary file, synced, and only then renamed into place. Older files are pruned once the
/// new one is durable, keeping at most `max_stored`.
#[derive(Debug)]
pub(crate) struct SnapshotStore {
    dir: PathBuf,
    max_stored: usize,
    batch_size: usize,
    logger: slog::Logger,
}

impl SnapshotStore {
    pub(crate) fn open(config: &ReplicaConfig) -> Result<Self, failure::Error> {
        let dir = config.snapshot_dir();
        fs::create_dir_all(&dir)?;
        let logger = config.logger.new(o!("component" => "snapshot"));

        // leftovers from a save that never finished
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.to_str().map_or(false, |p| p.ends_with(TMP_SUFFIX)) {
                warn!(logger, "removing unfinished snapshot"; "file" => %path.display());
                fs::remove_file(&path)?;
            }
        }

        Ok(SnapshotStore {
            dir,
            max_stored: config.max_stored_snapshots,
            batch_size: config.snapshot_batch_size,
            logger,
        })
    }

    /// Snapshot files on disk, oldest first.
    pub(crate) fn list(&self) -> io::Result<Vec<(Zxid, PathBuf)>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(zxid) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name)
            {
                snapshots.push((zxid, path));
            }
        }
        snapshots.sort_by_key(|(zxid, _)| *zxid);
        Ok(snapshots)
    }

    /// Writes `view` to disk and prunes old snapshots. Returns the zxid the snapshot covers.
    pub(crate) fn save(&self, view: &TreeView) -> Result<Zxid, failure::Error> {
        let zxid = view.last_zxid();
        let path = self.dir.join(file_name(zxid));
        if path.exists() {
            debug!(self.logger, "snapshot already on disk"; "zxid" => %zxid);
            return Ok(zxid);
        }

        self.write_atomically(&path, |w| format::encode(view, self.batch_size, w).map(drop))?;
        info!(self.logger, "snapshot saved";
              "zxid" => %zxid, "nodes" => view.len(), "file" => %path.display());
        self.prune()?;
        Ok(zxid)
    }

    /// Verifies and stores a snapshot received from another replica, returning the tree it holds.
    pub(crate) fn install(&self, bytes: &[u8]) -> Result<DataTree, failure::Error> {
        let tree = format::decode(bytes).map_err(|e| error::Recovery::SnapshotCorrupt {
            file: "<received>".to_owned(),
            reason: e.to_string(),
        })?;
        let path = self.dir.join(file_name(tree.last_zxid()));
        if !path.exists() {
            self.write_atomically(&path, |w| w.write_all(bytes))?;
            info!(self.logger, "snapshot installed"; "zxid" => %tree.last_zxid());
            self.prune()?;
        }
        Ok(tree)
    }

    fn write_atomically<F>(&self, path: &Path, write: F) -> Result<(), failure::Error>
    where
        F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        let mut writer = BufWriter::new(File::create(&tmp)?);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        sync_dir(&self.dir)?;
        Ok(())
    }

    fn prune(&self) -> Result<(), failure::Error> {
        let snapshots = self.list()?;
        if snapshots.len() <= self.max_stored {
            return Ok(());
        }
        let excess = snapshots.len() - self.max_stored;
        for (zxid, path) in &snapshots[..excess] {
            debug!(self.logger, "removing old snapshot"; "zxid" => %zxid);
            fs::remove_file(path)?;
        }
        sync_dir(&self.dir)?;
        Ok(())
    }

    /// Loads the newest snapshot that verifies, falling back to older ones.
    ///
    /// Returns `Ok(None)` if there are no snapshots at all, and
    /// [`error::Recovery::NoValidSnapshot`] if there are some but none of them is usable.
    pub(crate) fn load_latest(&self) -> Result<Option<DataTree>, failure::Error> {
        let snapshots = self.list()?;
        if snapshots.is_empty() {
            return Ok(None);
        }

        for (zxid, path) in snapshots.iter().rev() {
            match self.load(*zxid, path) {
                Ok(tree) => {
                    info!(self.logger, "loaded snapshot";
                          "zxid" => %zxid, "nodes" => tree.len());
                    return Ok(Some(tree));
                }
                Err(e) => {
                    warn!(self.logger, "skipping unusable snapshot";
                          "file" => %path.display(), "error" => %e);
                }
            }
        }
        Err(error::Recovery::NoValidSnapshot {
            tried: snapshots.len(),
        }
        .into())
    }

    fn load(&self, zxid: Zxid, path: &Path) -> Result<DataTree, error::Recovery> {
        let corrupt = |reason: String| error::Recovery::SnapshotCorrupt {
            file: path.display().to_string(),
            reason,
        };
        let file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
        let tree = format::decode(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;
        if tree.last_zxid() != zxid {
            return Err(corrupt(format!(
                "file covers {} but is named for {}",
                tree.last_zxid(),
                zxid
            )));
        }
        Ok(tree)
    }

    /// The newest snapshot that verifies, as raw bytes for shipping to another replica.
    pub(crate) fn latest_bytes(&self) -> Result<Option<(Zxid, Vec<u8>)>, failure::Error> {
        for (zxid, path) in self.list()?.into_iter().rev() {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // pruned by a background save in the meantime
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match format::decode(&bytes[..]) {
                Ok(ref tree) if tree.last_zxid() == zxid => return Ok(Some((zxid, bytes))),
                Ok(_) => {}
                Err(e) => {
                    warn!(self.logger, "not shipping unusable snapshot";
                          "file" => %path.display(), "error" => %e);
                }
            }
        }
        Ok(None)
    }

    /// The oldest snapshot still kept. Log entries at or before it are no longer needed.
    pub(crate) fn oldest_retained(&self) -> io::Result<Option<Zxid>> {
        Ok(self.list()?.first().map(|(zxid, _)| *zxid))
    }
}
