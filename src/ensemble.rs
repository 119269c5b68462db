//! A fixed group of replicas that agree on one order of entries.
//!
//! The [`Ensemble`] plays the part of the consensus layer: it elects the replica with the most
//! complete log as leader, stamps each operation with the next zxid of the leader's epoch,
//! replicates it to every live member and commits it once a majority has it on disk.

use async_trait::async_trait;
use failure::{bail, format_err};
use futures::future::join_all;
use slog::{debug, info, o, warn};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::data_tree::Applied;
use crate::proto::{Request, Response, ZkError};
use crate::transform::{self, RequestMarker};
use crate::{error, CreateMode, LogEntry, MultiResponse, Replica, ReplicaConfig, Stat, Zxid};

/// What the leader needs from the other members to replicate an entry.
#[async_trait]
pub trait Peer: Send + Sync {
    /// The member's configured id.
    fn id(&self) -> u64;

    /// The last entry the member has on disk.
    fn last_zxid(&self) -> Zxid;

    /// Durably store `entry` without applying it.
    async fn propose(&self, entry: LogEntry) -> Result<(), failure::Error>;

    /// Apply stored entries up to and including `upto`.
    async fn commit(&self, upto: Zxid) -> Result<Vec<Applied>, failure::Error>;

    /// Forget stored entries after `after`.
    async fn abandon(&self, after: Zxid) -> Result<(), failure::Error>;
}

#[async_trait]
impl Peer for Replica {
    fn id(&self) -> u64 {
        Replica::id(self)
    }

    fn last_zxid(&self) -> Zxid {
        Replica::last_zxid(self)
    }

    async fn propose(&self, entry: LogEntry) -> Result<(), failure::Error> {
        Replica::propose(self, entry)
    }

    async fn commit(&self, upto: Zxid) -> Result<Vec<Applied>, failure::Error> {
        Replica::commit(self, upto)
    }

    async fn abandon(&self, after: Zxid) -> Result<(), failure::Error> {
        Replica::abandon(self, after)
    }
}

struct Member {
    config: ReplicaConfig,
    replica: Option<Replica>,
}

/// A group of replicas, driven from one place.
///
/// Mutating operations go through the leader and return once a majority of members has the
/// entry on disk and the leader has applied it. Reads are served from the leader's tree. If there
/// is no leader (at startup, or after a failed commit attempt) the next operation elects one.
pub struct Ensemble {
    members: Vec<Member>,
    epoch: u32,
    leader: Option<usize>,
    last_zxid: Zxid,
    logger: slog::Logger,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Ensemble {
    /// Opens every configured replica and elects a leader.
    pub async fn start(
        configs: Vec<ReplicaConfig>,
        logger: slog::Logger,
    ) -> Result<Self, failure::Error> {
        if configs.is_empty() {
            bail!("an ensemble needs at least one replica");
        }
        let mut members = Vec::with_capacity(configs.len());
        for config in configs {
            let replica = Replica::open(config.clone())?;
            members.push(Member {
                config,
                replica: Some(replica),
            });
        }

        let mut ensemble = Ensemble {
            members,
            epoch: 0,
            leader: None,
            last_zxid: Zxid::ZERO,
            logger: logger.new(o!("component" => "ensemble")),
        };
        ensemble.elect().await?;
        Ok(ensemble)
    }

    /// Number of configured members, live or not.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the ensemble has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The member at `index`, if it is running.
    pub fn replica(&self, index: usize) -> Option<&Replica> {
        self.members.get(index).and_then(|m| m.replica.as_ref())
    }

    /// The index of the current leader.
    pub fn leader(&self) -> Option<usize> {
        self.leader
    }

    /// The epoch of the current (or last) leader.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    fn live(&self) -> Vec<(usize, Replica)> {
        self.members
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.replica.clone().map(|r| (i, r)))
            .collect()
    }

    /// Picks the live member with the most complete log as leader, starts a new epoch, and brings
    /// every other live member up to the leader's state.
    ///
    /// A member that cannot be caught up is stopped.
    pub async fn elect(&mut self) -> Result<usize, failure::Error> {
        self.leader = None;
        let live = self.live();
        let needed = self.quorum();
        if live.len() < needed {
            return Err(error::Commit::QuorumLost {
                acks: live.len(),
                needed,
            }
            .into());
        }

        let mut best: Option<(usize, Zxid)> = None;
        for (i, replica) in &live {
            let last = replica.last_zxid();
            if best.map_or(true, |(_, b)| last > b) {
                best = Some((*i, last));
            }
            self.epoch = self.epoch.max(last.epoch());
        }
        let (leader, last) = best.ok_or_else(|| format_err!("no live replica to lead"))?;
        self.epoch = self
            .epoch
            .checked_add(1)
            .ok_or_else(|| format_err!("epoch space exhausted"))?;

        for (i, follower) in &live {
            if *i == leader {
                continue;
            }
            if let Err(e) = self.catch_up(leader, follower).await {
                warn!(self.logger, "could not catch up replica; stopping it";
                      "replica" => follower.id(), "error" => %e);
                self.stop(*i).await?;
            }
        }

        self.leader = Some(leader);
        self.last_zxid = last;
        info!(self.logger, "leader elected";
              "leader" => leader, "epoch" => self.epoch, "last_zxid" => %last);
        Ok(leader)
    }

    async fn catch_up(&self, leader: usize, follower: &Replica) -> Result<(), failure::Error> {
        let source = self
            .replica(leader)
            .ok_or_else(|| format_err!("leader {} is not running", leader))?;
        let target = source.last_zxid();
        let have = follower.last_zxid();
        if have == target {
            return Ok(());
        }
        if have > target {
            bail!("replica {} is ahead of the leader ({} > {})", follower.id(), have, target);
        }

        let entries = match source.entries_after(have)? {
            Some(entries) => entries,
            None => {
                let (zxid, bytes) = source
                    .latest_snapshot()?
                    .ok_or_else(|| format_err!("log compacted past {} but no snapshot", have))?;
                follower.install_snapshot(&bytes)?;
                source
                    .entries_after(zxid)?
                    .ok_or_else(|| format_err!("log compacted past snapshot {}", zxid))?
            }
        };
        debug!(self.logger, "catching up replica";
               "replica" => follower.id(), "from" => %follower.last_zxid(), "entries" => entries.len());
        for entry in entries {
            Peer::propose(follower, entry).await?;
        }
        Peer::commit(follower, target).await?;
        Ok(())
    }

    /// Shuts the member at `index` down. Its data directory is left as it is.
    pub async fn stop(&mut self, index: usize) -> Result<(), failure::Error> {
        let member = self
            .members
            .get_mut(index)
            .ok_or_else(|| format_err!("no replica at index {}", index))?;
        if let Some(replica) = member.replica.take() {
            replica.shutdown().await?;
        }
        if self.leader == Some(index) {
            self.leader = None;
        }
        Ok(())
    }

    /// Stops the member at `index` (if running) and starts it again from its data directory.
    ///
    /// If there is a leader, the restarted member is caught up right away.
    pub async fn restart(&mut self, index: usize) -> Result<(), failure::Error> {
        self.stop(index).await?;
        let replica = Replica::open(self.members[index].config.clone())?;
        self.members[index].replica = Some(replica.clone());
        if let Some(leader) = self.leader {
            if let Err(e) = self.catch_up(leader, &replica).await {
                self.stop(index).await?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stops every member, starts them all again, and elects a new leader.
    pub async fn restart_all(&mut self) -> Result<(), failure::Error> {
        for i in 0..self.members.len() {
            self.stop(i).await?;
        }
        for member in &mut self.members {
            member.replica = Some(Replica::open(member.config.clone())?);
        }
        self.elect().await?;
        Ok(())
    }

    /// Stops every member.
    pub async fn shutdown(&mut self) -> Result<(), failure::Error> {
        for i in 0..self.members.len() {
            self.stop(i).await?;
        }
        Ok(())
    }

    async fn next_zxid(&mut self) -> Result<Zxid, failure::Error> {
        if self.last_zxid.epoch() == self.epoch {
            if let Some(next) = self.last_zxid.next_in_epoch() {
                return Ok(next);
            }
            info!(self.logger, "epoch exhausted; electing again"; "epoch" => self.epoch);
            self.elect().await?;
        }
        Ok(Zxid::new(self.epoch, 1))
    }

    /// Replicates one operation and returns the leader's result for it.
    ///
    /// If the leader cannot store the entry, or fewer than a majority of members can, every
    /// member forgets it, the leader steps down and the attempt fails. A later attempt gets a new
    /// zxid in a new epoch.
    pub async fn submit(
        &mut self,
        session_id: i64,
        request: Request,
    ) -> Result<Result<Response, ZkError>, failure::Error> {
        if self.leader.is_none() {
            self.elect().await?;
        }
        let zxid = self.next_zxid().await?;
        let leader = self.leader.ok_or(error::Commit::NotServing)?;
        let entry = LogEntry {
            zxid,
            session_id,
            time: now_millis(),
            request,
        };

        let live = self.live();
        let acks = join_all(live.iter().map(|(_, r)| Peer::propose(r, entry.clone()))).await;
        let mut acked = Vec::new();
        let mut leader_failure = None;
        let mut lagging = Vec::new();
        for ((i, replica), ack) in live.into_iter().zip(acks) {
            match ack {
                Ok(()) => acked.push((i, replica)),
                Err(e) => {
                    warn!(self.logger, "replica did not store entry";
                          "replica" => replica.id(), "zxid" => %zxid, "error" => %e);
                    if i == leader {
                        leader_failure = Some(e.to_string());
                    } else {
                        lagging.push(i);
                    }
                }
            }
        }

        let needed = self.quorum();
        if leader_failure.is_some() || acked.len() < needed {
            let prev = self.last_zxid;
            for (i, replica) in &acked {
                if let Err(e) = Peer::abandon(replica, prev).await {
                    warn!(self.logger, "could not abandon entry; stopping replica";
                          "replica" => replica.id(), "zxid" => %zxid, "error" => %e);
                    self.stop(*i).await?;
                }
            }
            self.leader = None;
            return Err(match leader_failure {
                Some(reason) => error::Commit::LogAppendFailure { zxid, reason },
                None => error::Commit::QuorumLost {
                    acks: acked.len(),
                    needed,
                },
            }
            .into());
        }

        // members that missed the entry cannot take later ones; they rejoin after a restart
        for i in lagging {
            self.stop(i).await?;
        }

        let commits = join_all(acked.iter().map(|(_, r)| Peer::commit(r, zxid))).await;
        self.last_zxid = zxid;
        let mut result = None;
        for ((i, replica), commit) in acked.into_iter().zip(commits) {
            match commit {
                Ok(mut applied) if i == leader => result = applied.pop(),
                Ok(_) => {}
                Err(e) => {
                    warn!(self.logger, "replica failed to apply committed entry; stopping it";
                          "replica" => replica.id(), "zxid" => %zxid, "error" => %e);
                    self.stop(i).await?;
                }
            }
        }

        match result {
            Some(applied) if applied.zxid == zxid => Ok(applied.result),
            _ => bail!("leader did not apply {}", zxid),
        }
    }

    /// Creates a node at `path` holding `data`.
    ///
    /// For sequential modes the returned path carries the generated suffix. Ephemeral modes
    /// require a session; use [`create_in_session`](Ensemble::create_in_session).
    pub async fn create<D>(
        &mut self,
        path: &str,
        data: D,
        mode: CreateMode,
    ) -> Result<Result<String, error::Create>, failure::Error>
    where
        D: Into<Vec<u8>>,
    {
        self.create_in_session(0, path, data, mode).await
    }

    /// Like [`create`](Ensemble::create), on behalf of `session_id`, which owns the node if it is
    /// ephemeral.
    pub async fn create_in_session<D>(
        &mut self,
        session_id: i64,
        path: &str,
        data: D,
        mode: CreateMode,
    ) -> Result<Result<String, error::Create>, failure::Error>
    where
        D: Into<Vec<u8>>,
    {
        let request = Request::Create {
            path: path.to_owned(),
            data: data.into(),
            mode,
        };
        transform::create(self.submit(session_id, request).await?)
    }

    /// Replaces the data of the node at `path`. With `Some(version)`, only if the node is at that
    /// version.
    pub async fn set_data<D>(
        &mut self,
        path: &str,
        version: Option<i32>,
        data: D,
    ) -> Result<Result<Stat, error::SetData>, failure::Error>
    where
        D: Into<Vec<u8>>,
    {
        let version = version.unwrap_or(-1);
        let request = Request::SetData {
            path: path.to_owned(),
            data: data.into(),
            version,
        };
        transform::set_data(version, self.submit(0, request).await?)
    }

    /// Deletes the node at `path`. With `Some(version)`, only if the node is at that version.
    pub async fn delete(
        &mut self,
        path: &str,
        version: Option<i32>,
    ) -> Result<Result<(), error::Delete>, failure::Error> {
        let version = version.unwrap_or(-1);
        let request = Request::Delete {
            path: path.to_owned(),
            version,
        };
        transform::delete(version, self.submit(0, request).await?)
    }

    /// Fails unless the node at `path` exists and is at `version`. Goes through the log like a
    /// write, so it observes every operation committed before it.
    pub async fn check(
        &mut self,
        path: &str,
        version: i32,
    ) -> Result<Result<(), error::Check>, failure::Error> {
        let request = Request::Check {
            path: path.to_owned(),
            version,
        };
        transform::check(version, self.submit(0, request).await?)
    }

    /// Opens a session and returns its id.
    pub async fn create_session(&mut self, timeout: i32) -> Result<i64, failure::Error> {
        transform::create_session(self.submit(0, Request::CreateSession { timeout }).await?)
    }

    /// Closes a session, deleting every ephemeral node it owns.
    pub async fn close_session(
        &mut self,
        session_id: i64,
    ) -> Result<Result<(), error::CloseSession>, failure::Error> {
        transform::close_session(self.submit(session_id, Request::CloseSession).await?)
    }

    /// Starts a batch of operations that commit together or not at all.
    pub fn multi(&mut self) -> MultiBuilder<'_> {
        MultiBuilder {
            ensemble: self,
            session_id: 0,
            requests: Vec::new(),
        }
    }

    fn serving(&self) -> Result<&Replica, failure::Error> {
        self.leader
            .and_then(|l| self.replica(l))
            .ok_or_else(|| error::Commit::NotServing.into())
    }

    /// The data and stat of the node at `path`, as the leader has it.
    pub fn get_data(&self, path: &str) -> Result<Option<(Vec<u8>, Stat)>, failure::Error> {
        Ok(self.serving()?.get_data(path))
    }

    /// The sorted child names of the node at `path`, as the leader has it.
    pub fn get_children(&self, path: &str) -> Result<Option<Vec<String>>, failure::Error> {
        Ok(self.serving()?.get_children(path))
    }

    /// The stat of the node at `path`, as the leader has it.
    pub fn exists(&self, path: &str) -> Result<Option<Stat>, failure::Error> {
        Ok(self.serving()?.exists(path))
    }
}

/// A batch of operations for [`Ensemble::multi`].
///
/// Members see the effects of earlier members. If any member fails, none of them takes effect.
pub struct MultiBuilder<'a> {
    ensemble: &'a mut Ensemble,
    session_id: i64,
    requests: Vec<Request>,
}

impl<'a> MultiBuilder<'a> {
    /// Runs the batch on behalf of `session_id`, which owns any ephemeral nodes it creates.
    pub fn session(mut self, session_id: i64) -> Self {
        self.session_id = session_id;
        self
    }

    /// Adds a create.
    pub fn create<D>(mut self, path: &str, data: D, mode: CreateMode) -> Self
    where
        D: Into<Vec<u8>>,
    {
        self.requests.push(Request::Create {
            path: path.to_owned(),
            data: data.into(),
            mode,
        });
        self
    }

    /// Adds a data replacement.
    pub fn set_data<D>(mut self, path: &str, version: Option<i32>, data: D) -> Self
    where
        D: Into<Vec<u8>>,
    {
        self.requests.push(Request::SetData {
            path: path.to_owned(),
            version: version.unwrap_or(-1),
            data: data.into(),
        });
        self
    }

    /// Adds a delete.
    pub fn delete(mut self, path: &str, version: Option<i32>) -> Self {
        self.requests.push(Request::Delete {
            path: path.to_owned(),
            version: version.unwrap_or(-1),
        });
        self
    }

    /// Adds a version check.
    pub fn check(mut self, path: &str, version: i32) -> Self {
        self.requests.push(Request::Check {
            path: path.to_owned(),
            version,
        });
        self
    }

    /// Commits the batch and returns one result per member, in order.
    ///
    /// If a member fails, it carries its own error, earlier members report
    /// [`RolledBack`](error::Multi::RolledBack) and later ones [`Skipped`](error::Multi::Skipped).
    pub async fn run(self) -> Result<Vec<Result<MultiResponse, error::Multi>>, failure::Error> {
        let MultiBuilder {
            ensemble,
            session_id,
            requests,
        } = self;
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let markers: Vec<RequestMarker> = requests.iter().map(RequestMarker::from).collect();

        match ensemble.submit(session_id, Request::Multi(requests)).await? {
            Ok(Response::Multi(results)) => {
                if results.len() != markers.len() {
                    bail!(
                        "got {} results for a batch of {}",
                        results.len(),
                        markers.len()
                    );
                }
                markers
                    .iter()
                    .zip(results)
                    .map(|(marker, res)| transform::multi(marker, res))
                    .collect()
            }
            Ok(r) => bail!("got a non-multi response to a multi request: {:?}", r),
            Err(e) => bail!("multi call failed: {:?}", e),
        }
    }
}
