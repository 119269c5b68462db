use failure::format_err;
use futures::task::noop_waker;
use pin_project::pin_project;
use slog::{debug, error, info, o, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::SnapshotStore;
use crate::data_tree::{DataTree, TreeView};
use crate::{ReplicaConfig, SnapshotMode, Zxid};

/// A snapshot being written in the background.
///
/// Resolves to the zxid the snapshot covers once the file is durable.
#[pin_project]
#[derive(Debug)]
pub(crate) struct PendingSnapshot {
    boundary: Zxid,
    #[pin]
    task: JoinHandle<Result<Zxid, failure::Error>>,
}

impl PendingSnapshot {
    pub(crate) fn boundary(&self) -> Zxid {
        self.boundary
    }
}

impl Future for PendingSnapshot {
    type Output = Result<Zxid, failure::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match futures::ready!(this.task.poll(cx)) {
            Ok(res) => Poll::Ready(res),
            Err(e) => Poll::Ready(Err(format_err!(
                "snapshot task at {} did not finish: {}",
                this.boundary,
                e
            ))),
        }
    }
}

/// Outcome of asking for a snapshot outside the regular schedule.
#[derive(Debug)]
pub(crate) enum Manual {
    /// The snapshot was written before returning.
    Done(Zxid),
    /// The snapshot is being written in the background.
    Started(PendingSnapshot),
    /// An earlier background snapshot has to finish first. Await it and ask again.
    Busy(PendingSnapshot),
}

/// Decides when to snapshot and drives the writes.
///
/// Every applied entry is counted; after `distance` of them a snapshot of the tree is taken.
/// In sync mode the file is written on the spot, so the caller (which holds the tree) stalls
/// commits until it is durable. In async mode only an O(1) view is taken and the file is written
/// on tokio's blocking pool while commits carry on. At most one snapshot is in flight.
#[derive(Debug)]
pub(crate) struct SnapshotEngine {
    store: Arc<SnapshotStore>,
    mode: SnapshotMode,
    distance: u64,
    since_last: u64,
    in_flight: Option<PendingSnapshot>,
    logger: slog::Logger,
}

impl SnapshotEngine {
    pub(crate) fn new(config: &ReplicaConfig, store: Arc<SnapshotStore>) -> Self {
        SnapshotEngine {
            store,
            mode: config.snapshot_mode,
            distance: config.snapshot_distance,
            since_last: 0,
            in_flight: None,
            logger: config.logger.new(o!(
                "component" => "snapshot",
                "mode" => format!("{:?}", config.snapshot_mode)
            )),
        }
    }

    pub(crate) fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Accounts for one applied entry. Must be called with the tree as it stands right after
    /// the entry, before anything else is applied.
    ///
    /// Returns the zxid of a snapshot that became durable since the last call, if any.
    pub(crate) fn after_apply(&mut self, tree: &DataTree) -> Option<Zxid> {
        let mut durable = self.reap();
        self.since_last += 1;
        if self.distance == 0 || self.since_last < self.distance || self.in_flight.is_some() {
            return durable;
        }

        self.since_last = 0;
        match self.start(tree.view()) {
            Ok(Some(zxid)) => durable = Some(zxid),
            Ok(None) => {}
            Err(e) => error!(self.logger, "snapshot failed"; "zxid" => %tree.last_zxid(), "error" => %e),
        }
        durable
    }

    /// Snapshots the tree now, regardless of the schedule.
    pub(crate) fn manual(&mut self, tree: &DataTree) -> Result<Manual, failure::Error> {
        if let Some(pending) = self.in_flight.take() {
            return Ok(Manual::Busy(pending));
        }
        self.since_last = 0;
        Ok(match self.start(tree.view())? {
            Some(zxid) => Manual::Done(zxid),
            None => match self.in_flight.take() {
                Some(pending) => Manual::Started(pending),
                None => Manual::Done(tree.last_zxid()),
            },
        })
    }

    /// Hands over the background snapshot, if one is running.
    pub(crate) fn take_in_flight(&mut self) -> Option<PendingSnapshot> {
        self.in_flight.take()
    }

    /// Starts a snapshot of `view`. Returns its zxid if it was written synchronously.
    fn start(&mut self, view: TreeView) -> Result<Option<Zxid>, failure::Error> {
        let boundary = view.last_zxid();
        if self.mode == SnapshotMode::Async {
            match Handle::try_current() {
                Ok(handle) => {
                    debug!(self.logger, "starting background snapshot"; "zxid" => %boundary);
                    let store = Arc::clone(&self.store);
                    let task = handle.spawn_blocking(move || store.save(&view));
                    self.in_flight = Some(PendingSnapshot { boundary, task });
                    return Ok(None);
                }
                Err(_) => {
                    warn!(self.logger, "no runtime to write in the background; writing inline";
                          "zxid" => %boundary);
                }
            }
        }
        self.store.save(&view).map(Some)
    }

    /// Collects the background snapshot if it has finished.
    fn reap(&mut self) -> Option<Zxid> {
        let pending = self.in_flight.as_mut()?;
        if !pending.task.is_finished() {
            return None;
        }

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let res = match Pin::new(pending).poll(&mut cx) {
            Poll::Ready(res) => res,
            Poll::Pending => return None,
        };
        self.in_flight = None;
        match res {
            Ok(zxid) => {
                info!(self.logger, "background snapshot done"; "zxid" => %zxid);
                Some(zxid)
            }
            Err(e) => {
                error!(self.logger, "background snapshot failed"; "error" => %e);
                None
            }
        }
    }
}
