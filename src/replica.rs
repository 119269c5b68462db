use futures::channel::oneshot;
use parking_lot::{Mutex, RwLock};
use slog::{debug, error, info, o, trace};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::data_tree::{Applied, DataTree, TreeView};
use crate::recovery::{self, RecoveryState};
use crate::snapshot::{Manual, SnapshotEngine, SnapshotStore};
use crate::txn_log::{LogEntry, TxnLog};
use crate::types::WatchType;
use crate::{error, ReplicaConfig, Stat, WatchedEvent, Zxid};

type Watchers = HashMap<String, Vec<(oneshot::Sender<WatchedEvent>, WatchType)>>;

/// One member of the ensemble: a data tree, the log and snapshots that make it durable, and the
/// watches registered against it.
///
/// Entries reach the tree in two steps. [`propose`](Replica::propose) appends an entry to the log
/// and holds it back; [`commit`](Replica::commit) applies every held entry up to a given zxid.
/// Nothing is visible to readers until it has been committed.
///
/// `Replica` is a cheap handle; clones share the same state.
#[derive(Clone)]
pub struct Replica {
    inner: Arc<Inner>,
}

// Locks are always taken in this order: log, pending, tree, snapshots, watches.
struct Inner {
    id: u64,
    log: Mutex<TxnLog>,
    pending: Mutex<VecDeque<LogEntry>>,
    tree: RwLock<DataTree>,
    snapshots: Mutex<SnapshotEngine>,
    store: Arc<SnapshotStore>,
    watchers: Mutex<Watchers>,
    state: Mutex<RecoveryState>,
    logger: slog::Logger,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl Replica {
    /// Starts a replica from whatever its data directory holds, and returns once it is serving.
    ///
    /// Fails if recovery does: a replica never serves from a state it could not fully rebuild.
    pub fn open(config: ReplicaConfig) -> Result<Self, failure::Error> {
        let logger = config.logger.new(o!("replica" => config.id));
        let state = Mutex::new(RecoveryState::Stopped);
        let mut config = config;
        config.set_logger(logger.clone());

        let store = Arc::new(SnapshotStore::open(&config)?);
        let recovered = match recovery::recover(&config, &store, &state, &logger) {
            Ok(recovered) => recovered,
            Err(e) => {
                error!(logger, "recovery failed"; "error" => %e);
                recovery::transition(&state, RecoveryState::Stopped, &logger);
                return Err(e);
            }
        };
        debug!(logger, "recovery done";
               "snapshot" => %recovered.snapshot, "replayed" => recovered.replayed);

        let engine = SnapshotEngine::new(&config, Arc::clone(&store));
        let replica = Replica {
            inner: Arc::new(Inner {
                id: config.id,
                log: Mutex::new(recovered.log),
                pending: Mutex::new(VecDeque::new()),
                tree: RwLock::new(recovered.tree),
                snapshots: Mutex::new(engine),
                store,
                watchers: Mutex::new(HashMap::new()),
                state,
                logger,
            }),
        };
        recovery::transition(
            &replica.inner.state,
            RecoveryState::Serving,
            &replica.inner.logger,
        );
        Ok(replica)
    }

    /// The id this replica was configured with.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Where the replica is in its lifecycle.
    pub fn state(&self) -> RecoveryState {
        *self.inner.state.lock()
    }

    /// The last entry in the log, committed or not.
    pub fn last_zxid(&self) -> Zxid {
        self.inner.log.lock().last_zxid()
    }

    /// The last entry applied to the tree.
    pub fn applied_zxid(&self) -> Zxid {
        self.inner.tree.read().last_zxid()
    }

    fn ensure_serving(&self) -> Result<(), error::Commit> {
        match self.state() {
            RecoveryState::Serving => Ok(()),
            _ => Err(error::Commit::NotServing),
        }
    }

    /// Durably appends `entry` to the log and holds it until it is committed.
    pub fn propose(&self, entry: LogEntry) -> Result<(), failure::Error> {
        self.ensure_serving()?;
        let mut log = self.inner.log.lock();
        log.append(&entry)?;
        trace!(self.inner.logger, "appended"; "zxid" => %entry.zxid);
        self.inner.pending.lock().push_back(entry);
        Ok(())
    }

    /// Applies every held entry up to and including `upto`, in order, and fires the watches they
    /// trigger.
    pub fn commit(&self, upto: Zxid) -> Result<Vec<Applied>, failure::Error> {
        self.ensure_serving()?;
        let mut applied = Vec::new();
        let mut durable = None;
        {
            let mut pending = self.inner.pending.lock();
            let mut tree = self.inner.tree.write();
            while pending.front().map_or(false, |e| e.zxid <= upto) {
                let entry = match pending.pop_front() {
                    Some(entry) => entry,
                    None => break,
                };
                let result = tree.apply(&entry)?;
                trace!(self.inner.logger, "applied";
                       "zxid" => %entry.zxid, "ok" => result.result.is_ok());
                if let Some(zxid) = self.inner.snapshots.lock().after_apply(&tree) {
                    durable = Some(zxid);
                }
                self.fire(&result.events);
                applied.push(result);
            }
        }
        if durable.is_some() {
            self.compact()?;
        }
        Ok(applied)
    }

    /// Drops every entry after `after` that was proposed but never committed, from memory and
    /// from the log.
    pub fn abandon(&self, after: Zxid) -> Result<(), failure::Error> {
        let mut log = self.inner.log.lock();
        log.truncate_after(after)?;
        self.inner.pending.lock().retain(|e| e.zxid <= after);
        debug!(self.inner.logger, "abandoned uncommitted entries"; "after" => %after);
        Ok(())
    }

    fn fire(&self, events: &[WatchedEvent]) {
        if events.is_empty() {
            return;
        }
        let mut watchers = self.inner.watchers.lock();
        for e in events {
            let waiting = match watchers.get_mut(&e.path) {
                Some(waiting) => waiting,
                None => continue,
            };
            let mut i = 0;
            while i < waiting.len() {
                if waiting[i].1.triggered_by(e.event_type) {
                    let (tx, kind) = waiting.swap_remove(i);
                    trace!(self.inner.logger, "firing watch";
                           "path" => &e.path, "kind" => ?kind, "event" => ?e.event_type);
                    // the receiver may have lost interest
                    let _ = tx.send(e.clone());
                } else {
                    i += 1;
                }
            }
            if waiting.is_empty() {
                watchers.remove(&e.path);
            }
        }
    }

    fn add_watch(&self, path: &str, kind: WatchType) -> oneshot::Receiver<WatchedEvent> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .watchers
            .lock()
            .entry(path.to_owned())
            .or_default()
            .push((tx, kind));
        rx
    }

    /// The data and stat of the node at `path`.
    pub fn get_data(&self, path: &str) -> Option<(Vec<u8>, Stat)> {
        let tree = self.inner.tree.read();
        tree.get(path).map(|n| (n.data().to_vec(), n.stat()))
    }

    /// The names of the children of the node at `path`, sorted.
    pub fn get_children(&self, path: &str) -> Option<Vec<String>> {
        self.inner.tree.read().children(path)
    }

    /// The stat of the node at `path`, if there is one.
    pub fn exists(&self, path: &str) -> Option<Stat> {
        self.inner.tree.read().stat(path)
    }

    /// Reads that also leave a one-shot watch behind.
    ///
    /// The watch is registered atomically with the read, so no change can slip in between.
    pub fn with_watcher(&self) -> WithWatcher<'_> {
        WithWatcher(self)
    }

    /// A consistent point-in-time view of the whole tree.
    pub fn view(&self) -> TreeView {
        self.inner.tree.read().view()
    }

    /// Takes a snapshot now, in the configured mode, and waits until it is durable.
    ///
    /// Returns the zxid the snapshot covers.
    pub async fn snapshot(&self) -> Result<Zxid, failure::Error> {
        loop {
            let step = {
                let tree = self.inner.tree.read();
                let mut engine = self.inner.snapshots.lock();
                engine.manual(&tree)?
            };
            let zxid = match step {
                Manual::Done(zxid) => zxid,
                Manual::Started(pending) => pending.await?,
                Manual::Busy(pending) => {
                    let zxid = pending.await?;
                    debug!(self.inner.logger, "earlier snapshot finished"; "zxid" => %zxid);
                    self.compact()?;
                    continue;
                }
            };
            self.compact()?;
            return Ok(zxid);
        }
    }

    /// Drops log segments that every retained snapshot already covers.
    fn compact(&self) -> Result<(), failure::Error> {
        if let Some(oldest) = self.inner.store.oldest_retained()? {
            let removed = self.inner.log.lock().compact(oldest)?;
            if removed > 0 {
                debug!(self.inner.logger, "log compacted"; "upto" => %oldest, "segments" => removed);
            }
        }
        Ok(())
    }

    /// Stops serving, waits for a background snapshot to finish, and flushes the log.
    pub async fn shutdown(&self) -> Result<(), failure::Error> {
        recovery::transition(
            &self.inner.state,
            RecoveryState::Stopped,
            &self.inner.logger,
        );
        let in_flight = self.inner.snapshots.lock().take_in_flight();
        if let Some(pending) = in_flight {
            debug!(self.inner.logger, "waiting for background snapshot"; "zxid" => %pending.boundary());
            let zxid = pending.await?;
            debug!(self.inner.logger, "background snapshot finished before shutdown"; "zxid" => %zxid);
            self.compact()?;
        }
        self.inner.log.lock().sync()?;
        info!(self.inner.logger, "replica shut down"; "applied" => %self.applied_zxid());
        Ok(())
    }

    /// Logged entries after `after`, for a replica that is catching up.
    ///
    /// Returns `Ok(None)` if the log has been compacted past `after`; the other replica needs a
    /// snapshot first.
    pub fn entries_after(&self, after: Zxid) -> Result<Option<Vec<LogEntry>>, failure::Error> {
        let log = self.inner.log.lock();
        if after < log.base() {
            return Ok(None);
        }
        log.read_from(after.after())
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// The newest valid snapshot on disk, as raw bytes.
    pub fn latest_snapshot(&self) -> Result<Option<(Zxid, Vec<u8>)>, failure::Error> {
        self.inner.store.latest_bytes()
    }

    /// Replaces this replica's state with a snapshot shipped from another replica.
    ///
    /// The snapshot is verified before anything is touched. Afterwards the log continues from the
    /// snapshot's zxid and anything held back is gone.
    pub fn install_snapshot(&self, bytes: &[u8]) -> Result<Zxid, failure::Error> {
        self.ensure_serving()?;
        let mut log = self.inner.log.lock();
        let mut pending = self.inner.pending.lock();
        let installed = self.inner.store.install(bytes)?;
        let zxid = installed.last_zxid();

        *self.inner.tree.write() = installed;
        pending.clear();
        log.reset(zxid)?;
        info!(self.inner.logger, "installed snapshot from peer"; "zxid" => %zxid);
        Ok(zxid)
    }
}

/// Reads that register a watch. See [`Replica::with_watcher`].
#[derive(Debug)]
pub struct WithWatcher<'a>(&'a Replica);

impl WithWatcher<'_> {
    /// Like [`Replica::get_data`]; the watch fires when the node's data changes or it is
    /// deleted. No watch is left if the node does not exist.
    pub fn get_data(
        &self,
        path: &str,
    ) -> Option<(oneshot::Receiver<WatchedEvent>, Vec<u8>, Stat)> {
        let tree = self.0.inner.tree.read();
        let node = tree.get(path)?;
        let rx = self.0.add_watch(path, WatchType::Data);
        Some((rx, node.data().to_vec(), node.stat()))
    }

    /// Like [`Replica::get_children`]; the watch fires when a child is added or removed, or the
    /// node is deleted. No watch is left if the node does not exist.
    pub fn get_children(
        &self,
        path: &str,
    ) -> Option<(oneshot::Receiver<WatchedEvent>, Vec<String>)> {
        let tree = self.0.inner.tree.read();
        let children = tree.children(path)?;
        let rx = self.0.add_watch(path, WatchType::Child);
        Some((rx, children))
    }

    /// Like [`Replica::exists`]; the watch fires on the node's creation if it is missing, and on
    /// data changes or deletion if it is present.
    pub fn exists(&self, path: &str) -> (oneshot::Receiver<WatchedEvent>, Option<Stat>) {
        let tree = self.0.inner.tree.read();
        let stat = tree.stat(path);
        let kind = if stat.is_some() {
            WatchType::Data
        } else {
            WatchType::Exist
        };
        (self.0.add_watch(path, kind), stat)
    }
}

#[cfg(test)]
impl Replica {
    pub(crate) fn with_log<T>(&self, f: impl FnOnce(&mut TxnLog) -> T) -> T {
        f(&mut self.inner.log.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CreateMode, Request, SnapshotMode, WatchedEventType};
    use futures::FutureExt;
    use std::path::Path;

    fn config(dir: &Path) -> ReplicaConfig {
        let mut config = ReplicaConfig::new(1, dir);
        config
            .set_snapshot_mode(SnapshotMode::Sync)
            .set_snapshot_distance(4)
            .set_max_stored_snapshots(2)
            .set_log_segment_entries(3);
        config
    }

    struct Driver {
        replica: Replica,
        counter: u32,
    }

    impl Driver {
        fn submit(&mut self, request: Request) -> Applied {
            self.counter += 1;
            let zxid = Zxid::new(1, self.counter);
            self.replica
                .propose(LogEntry {
                    zxid,
                    session_id: 0,
                    time: 42,
                    request,
                })
                .unwrap();
            self.replica.commit(zxid).unwrap().pop().unwrap()
        }

        fn create(&mut self, path: &str) -> Applied {
            self.submit(Request::Create {
                path: path.into(),
                data: b"v".to_vec(),
                mode: CreateMode::Persistent,
            })
        }
    }

    #[test]
    fn proposed_entries_stay_hidden_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        let replica = Replica::open(config(dir.path())).unwrap();
        let entry = LogEntry {
            zxid: Zxid::new(1, 1),
            session_id: 0,
            time: 0,
            request: Request::Create {
                path: "/a".into(),
                data: Vec::new(),
                mode: CreateMode::Persistent,
            },
        };
        replica.propose(entry).unwrap();
        assert_eq!(replica.last_zxid(), Zxid::new(1, 1));
        assert_eq!(replica.exists("/a"), None);

        replica.commit(Zxid::new(1, 1)).unwrap();
        assert!(replica.exists("/a").is_some());
        assert_eq!(replica.applied_zxid(), Zxid::new(1, 1));
    }

    #[test]
    fn abandoned_entries_do_not_come_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = Driver {
            replica: Replica::open(config(dir.path())).unwrap(),
            counter: 0,
        };
        d.create("/a");
        d.replica
            .propose(LogEntry {
                zxid: Zxid::new(1, 2),
                session_id: 0,
                time: 0,
                request: Request::Delete {
                    path: "/a".into(),
                    version: -1,
                },
            })
            .unwrap();
        d.replica.abandon(Zxid::new(1, 1)).unwrap();
        assert_eq!(d.replica.last_zxid(), Zxid::new(1, 1));
        assert!(d.replica.commit(Zxid::new(1, 2)).unwrap().is_empty());
        drop(d);

        let replica = Replica::open(config(dir.path())).unwrap();
        assert!(replica.exists("/a").is_some());
        assert_eq!(replica.last_zxid(), Zxid::new(1, 1));
    }

    #[test]
    fn failed_abandon_keeps_the_entry_held() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = Driver {
            replica: Replica::open(config(dir.path())).unwrap(),
            counter: 0,
        };
        d.create("/a");
        d.replica
            .propose(LogEntry {
                zxid: Zxid::new(1, 2),
                session_id: 0,
                time: 0,
                request: Request::Delete {
                    path: "/a".into(),
                    version: -1,
                },
            })
            .unwrap();

        // the segment can no longer be read back, so it cannot be cut either
        let segment = d.replica.with_log(|log| log.active_path().to_owned());
        std::fs::remove_file(segment).unwrap();
        assert!(d.replica.abandon(Zxid::new(1, 1)).is_err());

        assert_eq!(d.replica.last_zxid(), Zxid::new(1, 2));
        assert_eq!(d.replica.inner.pending.lock().len(), 1);
    }

    #[test]
    fn reopen_rebuilds_identical_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = Driver {
            replica: Replica::open(config(dir.path())).unwrap(),
            counter: 0,
        };
        d.create("/a");
        for i in 0..10 {
            d.create(&format!("/a/{}", i));
        }
        d.submit(Request::SetData {
            path: "/a".into(),
            data: b"hello".to_vec(),
            version: 0,
        });
        let before = d.replica.view();
        let snapshots = d.replica.inner.store.list().unwrap().len();
        assert!(snapshots > 0 && snapshots <= 2);
        drop(d);

        let replica = Replica::open(config(dir.path())).unwrap();
        assert_eq!(replica.state(), RecoveryState::Serving);
        assert_eq!(replica.view(), before);
        assert_eq!(replica.get_children("/a").unwrap().len(), 10);
    }

    #[test]
    fn entries_after_a_compacted_point_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = Driver {
            replica: Replica::open(config(dir.path())).unwrap(),
            counter: 0,
        };
        for i in 0..20 {
            d.create(&format!("/n{}", i));
        }
        assert!(d.replica.inner.log.lock().base() > Zxid::ZERO);
        assert_eq!(d.replica.entries_after(Zxid::ZERO).unwrap(), None);

        let base = d.replica.inner.log.lock().base();
        let tail = d.replica.entries_after(base).unwrap().unwrap();
        assert_eq!(tail.last().map(|e| e.zxid), Some(Zxid::new(1, 20)));
        assert_eq!(tail[0].zxid, base.after());
    }

    #[test]
    fn snapshot_install_replaces_state() {
        let src_dir = tempfile::tempdir().unwrap();
        let mut src = Driver {
            replica: Replica::open(config(src_dir.path())).unwrap(),
            counter: 0,
        };
        for i in 0..8 {
            src.create(&format!("/n{}", i));
        }
        let (zxid, bytes) = src.replica.latest_snapshot().unwrap().unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst = Replica::open(config(dst_dir.path())).unwrap();
        assert_eq!(dst.install_snapshot(&bytes).unwrap(), zxid);
        assert_eq!(dst.last_zxid(), zxid);
        assert_eq!(dst.applied_zxid(), zxid);
        assert_eq!(dst.view(), src.replica.view());
        drop(dst);

        let dst = Replica::open(config(dst_dir.path())).unwrap();
        assert_eq!(dst.view(), src.replica.view());
    }

    #[test]
    fn watches_fire_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = Driver {
            replica: Replica::open(config(dir.path())).unwrap(),
            counter: 0,
        };
        let (created, stat) = d.replica.with_watcher().exists("/a");
        assert_eq!(stat, None);
        d.create("/a");
        let e = created.now_or_never().unwrap().unwrap();
        assert_eq!(e.event_type, WatchedEventType::NodeCreated);
        assert_eq!(e.path, "/a");

        let (children, names) = d.replica.with_watcher().get_children("/a").unwrap();
        assert!(names.is_empty());
        let (data, _, _) = d.replica.with_watcher().get_data("/a").unwrap();
        d.create("/a/b");
        assert_eq!(
            children.now_or_never().unwrap().unwrap().event_type,
            WatchedEventType::NodeChildrenChanged
        );

        d.submit(Request::SetData {
            path: "/a".into(),
            data: Vec::new(),
            version: -1,
        });
        assert_eq!(
            data.now_or_never().unwrap().unwrap().event_type,
            WatchedEventType::NodeDataChanged
        );
        assert!(d.replica.inner.watchers.lock().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_serving() {
        let dir = tempfile::tempdir().unwrap();
        let replica = Replica::open(config(dir.path())).unwrap();
        replica.shutdown().await.unwrap();
        assert_eq!(replica.state(), RecoveryState::Stopped);
        let err = replica
            .propose(LogEntry {
                zxid: Zxid::new(1, 1),
                session_id: 0,
                time: 0,
                request: Request::CloseSession,
            })
            .unwrap_err();
        assert_eq!(
            err.downcast::<error::Commit>().unwrap(),
            error::Commit::NotServing
        );
    }
}
