//! The replicated state: a tree of znodes plus the open sessions.
//!
//! [`DataTree::apply`] is the only way to mutate it. The outcome of an entry depends on nothing
//! but the tree and the entry, so every replica (and every replay) that applies the same entries
//! in the same order ends up with identical state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::proto::{Request, Response, ZkError};
use crate::{error, CreateMode, LogEntry, Stat, WatchedEvent, WatchedEventType, Zxid};

mod node;
pub(crate) mod path;
mod view;

pub use self::node::Node;
pub use self::view::TreeView;

/// What applying a single log entry produced.
#[derive(Debug)]
pub struct Applied {
    /// The entry that was applied.
    pub zxid: Zxid,
    /// The operation's outcome. Client errors land here and still consume the zxid.
    pub result: Result<Response, ZkError>,
    /// Watch triggers, in the order the changes happened.
    pub events: Vec<WatchedEvent>,
}

/// The parts of a log entry that mutations stamp into node metadata.
struct Txn {
    zxid: i64,
    time: i64,
    session_id: i64,
}

/// Prior versions of every node a `multi` batch has touched, so a failing member can put them
/// all back.
struct Undo {
    recording: bool,
    touched: BTreeSet<String>,
    prior: Vec<(String, Option<Arc<Node>>)>,
}

impl Undo {
    fn disabled() -> Self {
        Undo {
            recording: false,
            touched: BTreeSet::new(),
            prior: Vec::new(),
        }
    }

    fn recording() -> Self {
        Undo {
            recording: true,
            ..Undo::disabled()
        }
    }

    fn record(&mut self, path: &str, current: Option<&Arc<Node>>) {
        if self.recording && self.touched.insert(path.to_owned()) {
            self.prior.push((path.to_owned(), current.cloned()));
        }
    }
}

/// The in-memory tree of znodes.
#[derive(Clone, Debug)]
pub struct DataTree {
    nodes: Arc<BTreeMap<String, Arc<Node>>>,
    sessions: Arc<BTreeMap<i64, i32>>,
    /// Derived index: owning session -> paths of its ephemeral nodes.
    ephemerals: BTreeMap<i64, BTreeSet<String>>,
    next_session_id: i64,
    last_zxid: Zxid,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    /// An empty tree holding only the root.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_owned(), Arc::new(Node::default()));
        DataTree {
            nodes: Arc::new(nodes),
            sessions: Arc::new(BTreeMap::new()),
            ephemerals: BTreeMap::new(),
            next_session_id: 1,
            last_zxid: Zxid::ZERO,
        }
    }

    /// Reassembles a tree from stored nodes, whose child sets are ignored and rebuilt from the
    /// paths.
    pub(crate) fn from_parts(
        nodes: BTreeMap<String, Node>,
        sessions: BTreeMap<i64, i32>,
        next_session_id: i64,
        last_zxid: Zxid,
    ) -> Result<Self, String> {
        if !nodes.contains_key("/") {
            return Err("tree has no root".to_owned());
        }

        let mut links = Vec::with_capacity(nodes.len());
        for p in nodes.keys().filter(|p| p.as_str() != "/") {
            path::validate(p).map_err(|_| format!("invalid path {:?}", p))?;
            let (parent, name) = path::split(p);
            if !nodes.contains_key(parent) {
                return Err(format!("{} has no parent", p));
            }
            links.push((parent.to_owned(), name.to_owned()));
        }

        let mut nodes = nodes;
        for node in nodes.values_mut() {
            node.children.clear();
        }
        for (parent, name) in links {
            if let Some(parent) = nodes.get_mut(&parent) {
                parent.children.insert(name);
            }
        }

        let mut ephemerals: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        for (p, node) in &nodes {
            if node.is_ephemeral() {
                ephemerals
                    .entry(node.ephemeral_owner)
                    .or_default()
                    .insert(p.clone());
            }
        }

        Ok(DataTree {
            nodes: Arc::new(nodes.into_iter().map(|(p, n)| (p, Arc::new(n))).collect()),
            sessions: Arc::new(sessions),
            ephemerals,
            next_session_id,
            last_zxid,
        })
    }

    /// The last entry applied to this tree.
    pub fn last_zxid(&self) -> Zxid {
        self.last_zxid
    }

    /// Look up a node.
    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path).map(|n| &**n)
    }

    /// Shortcut for the stat of a node.
    pub fn stat(&self, path: &str) -> Option<Stat> {
        self.get(path).map(Node::stat)
    }

    /// Sorted child names of a node.
    pub fn children(&self, path: &str) -> Option<Vec<String>> {
        self.get(path).map(|n| n.children.iter().cloned().collect())
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Never true for a tree built through this module.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if the session is open.
    pub fn has_session(&self, session_id: i64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Paths of the ephemeral nodes owned by a session, in path order.
    pub fn ephemerals(&self, session_id: i64) -> Vec<String> {
        self.ephemerals
            .get(&session_id)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A point-in-time view that later mutations cannot affect.
    pub fn view(&self) -> TreeView {
        TreeView {
            nodes: Arc::clone(&self.nodes),
            sessions: Arc::clone(&self.sessions),
            next_session_id: self.next_session_id,
            last_zxid: self.last_zxid,
        }
    }

    /// Apply the next committed entry.
    ///
    /// Entries must arrive in increasing zxid order. Client-level failures (a missing node, a
    /// version mismatch, ...) are part of the returned [`Applied`] and leave the tree untouched
    /// apart from advancing [`last_zxid`](DataTree::last_zxid).
    pub fn apply(&mut self, entry: &LogEntry) -> Result<Applied, error::Commit> {
        if entry.zxid <= self.last_zxid {
            return Err(error::Commit::OutOfOrder {
                last: self.last_zxid,
                got: entry.zxid,
            });
        }

        let txn = Txn {
            zxid: entry.zxid.as_i64(),
            time: entry.time,
            session_id: entry.session_id,
        };
        let mut events = Vec::new();
        let result = self.apply_op(&entry.request, &txn, &mut Undo::disabled(), &mut events);
        self.last_zxid = entry.zxid;

        Ok(Applied {
            zxid: entry.zxid,
            result,
            events,
        })
    }

    fn apply_op(
        &mut self,
        request: &Request,
        txn: &Txn,
        undo: &mut Undo,
        events: &mut Vec<WatchedEvent>,
    ) -> Result<Response, ZkError> {
        match *request {
            Request::Create {
                ref path,
                ref data,
                mode,
            } => self.create(path, data, mode, txn, undo, events),
            Request::Delete { ref path, version } => {
                self.delete(path, version, txn, undo, events)
            }
            Request::SetData {
                ref path,
                ref data,
                version,
            } => self.set_data(path, data, version, txn, undo, events),
            Request::Check { ref path, version } => self.check(path, version),
            Request::Multi(ref ops) => self.multi(ops, txn, events),
            Request::CreateSession { timeout } => Ok(self.create_session(timeout)),
            Request::CloseSession => self.close_session(txn, events),
        }
    }

    fn nodes_mut(&mut self) -> &mut BTreeMap<String, Arc<Node>> {
        Arc::make_mut(&mut self.nodes)
    }

    fn touch(&mut self, path: &str, undo: &mut Undo) -> Option<&mut Node> {
        undo.record(path, self.nodes.get(path));
        self.nodes_mut().get_mut(path).map(Arc::make_mut)
    }

    fn insert(&mut self, path: String, node: Node, undo: &mut Undo) {
        undo.record(&path, self.nodes.get(&path));
        if node.is_ephemeral() {
            self.ephemerals
                .entry(node.ephemeral_owner)
                .or_default()
                .insert(path.clone());
        }
        self.nodes_mut().insert(path, Arc::new(node));
    }

    fn remove(&mut self, path: &str, undo: &mut Undo) -> Option<Arc<Node>> {
        undo.record(path, self.nodes.get(path));
        let node = self.nodes_mut().remove(path)?;
        if node.is_ephemeral() {
            self.unindex_ephemeral(node.ephemeral_owner, path);
        }
        Some(node)
    }

    fn unindex_ephemeral(&mut self, owner: i64, path: &str) {
        if let Some(paths) = self.ephemerals.get_mut(&owner) {
            paths.remove(path);
            if paths.is_empty() {
                self.ephemerals.remove(&owner);
            }
        }
    }

    fn rollback(&mut self, undo: Undo) {
        for (path, prior) in undo.prior.into_iter().rev() {
            let current = match prior {
                Some(ref node) => self.nodes_mut().insert(path.clone(), Arc::clone(node)),
                None => self.nodes_mut().remove(&path),
            };
            if let Some(current) = current.filter(|n| n.is_ephemeral()) {
                self.unindex_ephemeral(current.ephemeral_owner, &path);
            }
            if let Some(prior) = prior.filter(|n| n.is_ephemeral()) {
                self.ephemerals
                    .entry(prior.ephemeral_owner)
                    .or_default()
                    .insert(path);
            }
        }
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        txn: &Txn,
        undo: &mut Undo,
        events: &mut Vec<WatchedEvent>,
    ) -> Result<Response, ZkError> {
        if mode.is_sequential() {
            // the suffix completes a path that may end in '/'
            path::validate(&format!("{}0", path))?;
        } else {
            path::validate(path)?;
        }
        if path == "/" {
            return Err(ZkError::NodeExists);
        }

        let (parent_path, _) = path::split(path);
        let parent = self.nodes.get(parent_path).ok_or(ZkError::NoNode)?;
        if parent.is_ephemeral() {
            return Err(ZkError::NoChildrenForEphemerals);
        }
        let path = if mode.is_sequential() {
            format!("{}{:010}", path, parent.cversion)
        } else {
            path.to_owned()
        };
        if self.nodes.contains_key(&path) {
            return Err(ZkError::NodeExists);
        }
        let owner = if mode.is_ephemeral() {
            if !self.sessions.contains_key(&txn.session_id) {
                return Err(ZkError::SessionExpired);
            }
            txn.session_id
        } else {
            0
        };

        let (parent_path, name) = path::split(&path);
        let (parent_path, name) = (parent_path.to_owned(), name.to_owned());
        let parent = self
            .touch(&parent_path, undo)
            .ok_or(ZkError::DataInconsistency)?;
        parent.children.insert(name);
        parent.cversion += 1;
        parent.pzxid = txn.zxid;

        self.insert(
            path.clone(),
            Node {
                data: data.to_vec(),
                czxid: txn.zxid,
                mzxid: txn.zxid,
                pzxid: txn.zxid,
                ctime: txn.time,
                mtime: txn.time,
                ephemeral_owner: owner,
                ..Node::default()
            },
            undo,
        );

        events.push(WatchedEvent::new(WatchedEventType::NodeCreated, path.clone()));
        events.push(WatchedEvent::new(
            WatchedEventType::NodeChildrenChanged,
            parent_path,
        ));
        Ok(Response::String(path))
    }

    fn delete(
        &mut self,
        path: &str,
        version: i32,
        txn: &Txn,
        undo: &mut Undo,
        events: &mut Vec<WatchedEvent>,
    ) -> Result<Response, ZkError> {
        path::validate(path)?;
        if path == "/" {
            return Err(ZkError::BadArguments);
        }
        let node = self.nodes.get(path).ok_or(ZkError::NoNode)?;
        if version != -1 && node.version != version {
            return Err(ZkError::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(ZkError::NotEmpty);
        }

        let (parent_path, name) = path::split(path);
        let parent = self
            .touch(parent_path, undo)
            .ok_or(ZkError::DataInconsistency)?;
        parent.children.remove(name);
        parent.cversion += 1;
        parent.pzxid = txn.zxid;
        self.remove(path, undo);

        events.push(WatchedEvent::new(WatchedEventType::NodeDeleted, path));
        events.push(WatchedEvent::new(
            WatchedEventType::NodeChildrenChanged,
            parent_path,
        ));
        Ok(Response::Empty)
    }

    fn set_data(
        &mut self,
        path: &str,
        data: &[u8],
        version: i32,
        txn: &Txn,
        undo: &mut Undo,
        events: &mut Vec<WatchedEvent>,
    ) -> Result<Response, ZkError> {
        path::validate(path)?;
        let node = self.nodes.get(path).ok_or(ZkError::NoNode)?;
        if version != -1 && node.version != version {
            return Err(ZkError::BadVersion);
        }

        let node = self.touch(path, undo).ok_or(ZkError::NoNode)?;
        node.data = data.to_vec();
        node.version += 1;
        node.mzxid = txn.zxid;
        node.mtime = txn.time;
        let stat = node.stat();

        events.push(WatchedEvent::new(WatchedEventType::NodeDataChanged, path));
        Ok(Response::Stat(stat))
    }

    fn check(&self, path: &str, version: i32) -> Result<Response, ZkError> {
        path::validate(path)?;
        let node = self.nodes.get(path).ok_or(ZkError::NoNode)?;
        if version != -1 && node.version != version {
            return Err(ZkError::BadVersion);
        }
        Ok(Response::Empty)
    }

    fn multi(
        &mut self,
        ops: &[Request],
        txn: &Txn,
        events: &mut Vec<WatchedEvent>,
    ) -> Result<Response, ZkError> {
        let mark = events.len();
        let mut undo = Undo::recording();
        let mut results = Vec::with_capacity(ops.len());

        for (i, op) in ops.iter().enumerate() {
            let res = match *op {
                Request::Multi(_) | Request::CreateSession { .. } | Request::CloseSession => {
                    Err(ZkError::BadArguments)
                }
                _ => self.apply_op(op, txn, &mut undo, events),
            };
            match res {
                Ok(r) => results.push(Ok(r)),
                Err(e) => {
                    self.rollback(undo);
                    events.truncate(mark);

                    let mut failed: Vec<Result<Response, ZkError>> =
                        Vec::with_capacity(ops.len());
                    failed.extend((0..i).map(|_| Err(ZkError::Ok)));
                    failed.push(Err(e));
                    failed.extend((i + 1..ops.len()).map(|_| Err(ZkError::RuntimeInconsistency)));
                    return Ok(Response::Multi(failed));
                }
            }
        }
        Ok(Response::Multi(results))
    }

    fn create_session(&mut self, timeout: i32) -> Response {
        let session_id = self.next_session_id;
        self.next_session_id += 1;
        Arc::make_mut(&mut self.sessions).insert(session_id, timeout);
        Response::Session { session_id }
    }

    fn close_session(
        &mut self,
        txn: &Txn,
        events: &mut Vec<WatchedEvent>,
    ) -> Result<Response, ZkError> {
        if !self.sessions.contains_key(&txn.session_id) {
            return Err(ZkError::SessionExpired);
        }
        Arc::make_mut(&mut self.sessions).remove(&txn.session_id);

        // ephemeral nodes never have children, so these deletes cannot fail
        for path in self.ephemerals(txn.session_id) {
            self.delete(&path, -1, txn, &mut Undo::disabled(), events)?;
        }
        Ok(Response::Empty)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Feeds requests to a tree with consecutive zxids in epoch 1.
    pub(crate) struct Feeder {
        pub(crate) tree: DataTree,
        counter: u32,
    }

    impl Feeder {
        pub(crate) fn new() -> Self {
            Feeder {
                tree: DataTree::new(),
                counter: 0,
            }
        }

        pub(crate) fn entry(&mut self, session_id: i64, request: Request) -> LogEntry {
            self.counter += 1;
            LogEntry {
                zxid: Zxid::new(1, self.counter),
                session_id,
                time: 1_000 + i64::from(self.counter),
                request,
            }
        }

        pub(crate) fn run(&mut self, session_id: i64, request: Request) -> Applied {
            let entry = self.entry(session_id, request);
            self.tree.apply(&entry).unwrap()
        }

        pub(crate) fn create(&mut self, path: &str, data: &[u8]) -> Result<Response, ZkError> {
            self.run(
                0,
                Request::Create {
                    path: path.into(),
                    data: data.to_vec(),
                    mode: CreateMode::Persistent,
                },
            )
            .result
        }
    }

    fn delete(path: &str, version: i32) -> Request {
        Request::Delete {
            path: path.into(),
            version,
        }
    }

    fn create(path: &str, mode: CreateMode) -> Request {
        Request::Create {
            path: path.into(),
            data: Vec::new(),
            mode,
        }
    }

    fn assert_consistent(tree: &DataTree) {
        for (path, node) in tree.view().iter() {
            let stat = node.stat();
            assert_eq!(stat.data_length as usize, node.data().len(), "{}", path);
            assert_eq!(stat.num_children as usize, node.children().count(), "{}", path);
            assert!(stat.czxid <= stat.mzxid, "{}", path);
            assert!(stat.czxid <= stat.pzxid, "{}", path);
        }
    }

    #[test]
    fn parent_tracks_children() {
        let mut f = Feeder::new();
        assert_eq!(f.create("/a", b"hello"), Ok(Response::String("/a".into())));
        let a = f.tree.stat("/a").unwrap();
        assert_eq!(a.version, 0);
        assert_eq!(a.data_length, 5);
        assert_eq!(a.czxid, Zxid::new(1, 1).as_i64());
        assert_eq!(a.ctime, 1_001);

        for i in 0..10 {
            f.create(&format!("/a/{}", i), b"").unwrap();
        }
        let a = f.tree.stat("/a").unwrap();
        assert_eq!(a.cversion, 10);
        assert_eq!(a.num_children, 10);
        assert_eq!(a.pzxid, Zxid::new(1, 11).as_i64());
        // child changes leave the data metadata alone
        assert_eq!(a.mzxid, Zxid::new(1, 1).as_i64());
        assert_eq!(a.version, 0);
        assert_eq!(f.tree.stat("/a/5").unwrap().version, 0);
        assert_eq!(f.tree.children("/a").unwrap().len(), 10);
        assert_consistent(&f.tree);
    }

    #[test]
    fn create_failures() {
        let mut f = Feeder::new();
        assert_eq!(f.create("/a/b", b""), Err(ZkError::NoNode));
        f.create("/a", b"").unwrap();
        assert_eq!(f.create("/a", b""), Err(ZkError::NodeExists));
        assert_eq!(f.create("/", b""), Err(ZkError::NodeExists));
        assert_eq!(f.create("a", b""), Err(ZkError::BadArguments));
        assert_eq!(f.create("/a/", b""), Err(ZkError::BadArguments));

        // failures still consume their zxid
        assert_eq!(f.tree.last_zxid(), Zxid::new(1, 6));
        assert_eq!(f.tree.stat("/").unwrap().cversion, 1);
    }

    #[test]
    fn delete_updates_parent() {
        let mut f = Feeder::new();
        f.create("/a", b"").unwrap();
        f.create("/a/b", b"").unwrap();

        assert_eq!(f.run(0, delete("/a", -1)).result, Err(ZkError::NotEmpty));
        assert_eq!(f.run(0, delete("/a/b", 3)).result, Err(ZkError::BadVersion));
        assert_eq!(f.run(0, delete("/a/c", -1)).result, Err(ZkError::NoNode));
        assert_eq!(f.run(0, delete("/", -1)).result, Err(ZkError::BadArguments));

        let applied = f.run(0, delete("/a/b", 0));
        assert_eq!(applied.result, Ok(Response::Empty));
        assert_eq!(
            applied.events,
            vec![
                WatchedEvent::new(WatchedEventType::NodeDeleted, "/a/b"),
                WatchedEvent::new(WatchedEventType::NodeChildrenChanged, "/a"),
            ]
        );
        let a = f.tree.stat("/a").unwrap();
        assert_eq!(a.num_children, 0);
        assert_eq!(a.cversion, 2);
        assert_eq!(a.pzxid, applied.zxid.as_i64());
        assert!(f.tree.get("/a/b").is_none());
        assert_consistent(&f.tree);
    }

    #[test]
    fn set_data_bumps_version() {
        let mut f = Feeder::new();
        f.create("/a", b"hello").unwrap();
        let set = |version| Request::SetData {
            path: "/a".into(),
            data: b"hi".to_vec(),
            version,
        };

        assert_eq!(f.run(0, set(1)).result, Err(ZkError::BadVersion));
        let applied = f.run(0, set(0));
        let stat = match applied.result {
            Ok(Response::Stat(stat)) => stat,
            r => panic!("unexpected {:?}", r),
        };
        assert_eq!(stat.version, 1);
        assert_eq!(stat.data_length, 2);
        assert_eq!(stat.mzxid, applied.zxid.as_i64());
        assert_eq!(stat.pzxid, stat.czxid);
        assert_eq!(f.run(0, set(-1)).result.map(|_| ()), Ok(()));
        assert_eq!(f.tree.stat("/a").unwrap().version, 2);
        assert_eq!(f.tree.get("/a").unwrap().data(), b"hi");
    }

    #[test]
    fn sequential_suffix_comes_from_parent_cversion() {
        let mut f = Feeder::new();
        f.create("/q", b"").unwrap();
        f.create("/q/other", b"").unwrap();
        let r = f.run(0, create("/q/job-", CreateMode::PersistentSequential));
        assert_eq!(r.result, Ok(Response::String("/q/job-0000000001".into())));
        let r = f.run(0, create("/q/", CreateMode::PersistentSequential));
        assert_eq!(r.result, Ok(Response::String("/q/0000000002".into())));
    }

    #[test]
    fn ephemerals_follow_their_session() {
        let mut f = Feeder::new();
        f.create("/e", b"").unwrap();
        assert_eq!(
            f.run(7, create("/e/x", CreateMode::Ephemeral)).result,
            Err(ZkError::SessionExpired)
        );

        let session = match f.run(0, Request::CreateSession { timeout: 3000 }).result {
            Ok(Response::Session { session_id }) => session_id,
            r => panic!("unexpected {:?}", r),
        };
        assert_eq!(session, 1);
        f.run(session, create("/e/x", CreateMode::Ephemeral))
            .result
            .unwrap();
        f.run(session, create("/e/s-", CreateMode::EphemeralSequential))
            .result
            .unwrap();
        assert_eq!(
            f.run(session, create("/e/x/y", CreateMode::Persistent)).result,
            Err(ZkError::NoChildrenForEphemerals)
        );
        assert_eq!(f.tree.stat("/e/x").unwrap().ephemeral_owner, session);
        assert_eq!(f.tree.ephemerals(session), vec!["/e/s-0000000001", "/e/x"]);

        let closed = f.run(session, Request::CloseSession);
        assert_eq!(closed.result, Ok(Response::Empty));
        assert_eq!(f.tree.children("/e").unwrap(), Vec::<String>::new());
        assert!(f.tree.ephemerals(session).is_empty());
        assert!(!f.tree.has_session(session));
        assert_eq!(f.tree.stat("/e").unwrap().cversion, 4);
        assert_eq!(
            f.run(session, Request::CloseSession).result,
            Err(ZkError::SessionExpired)
        );
        assert_consistent(&f.tree);
    }

    #[test]
    fn failed_multi_changes_nothing() {
        let mut f = Feeder::new();
        f.create("/x", b"").unwrap();
        let before = f.tree.view();

        let applied = f.run(
            0,
            Request::Multi(vec![
                create("/x/q0", CreateMode::Persistent),
                delete("/x/a0", -1),
                create("/x/x0", CreateMode::Persistent),
            ]),
        );
        assert_eq!(
            applied.result,
            Ok(Response::Multi(vec![
                Err(ZkError::Ok),
                Err(ZkError::NoNode),
                Err(ZkError::RuntimeInconsistency),
            ]))
        );
        assert!(applied.events.is_empty());
        assert_eq!(f.tree.stat("/x").unwrap().num_children, 0);
        assert!(before.iter().eq(f.tree.view().iter()));
    }

    #[test]
    fn failed_multi_restores_ephemeral_index() {
        let mut f = Feeder::new();
        f.run(0, Request::CreateSession { timeout: 10 });
        f.run(1, create("/gone", CreateMode::Ephemeral));

        let applied = f.run(
            1,
            Request::Multi(vec![
                delete("/gone", -1),
                create("/new", CreateMode::Ephemeral),
                Request::Check {
                    path: "/gone".into(),
                    version: -1,
                },
            ]),
        );
        match applied.result {
            Ok(Response::Multi(ref results)) => {
                assert_eq!(results[2], Err(ZkError::NoNode));
            }
            ref r => panic!("unexpected {:?}", r),
        }
        assert_eq!(f.tree.ephemerals(1), vec!["/gone"]);
        assert!(f.tree.get("/new").is_none());
    }

    #[test]
    fn multi_members_see_earlier_members() {
        let mut f = Feeder::new();
        let applied = f.run(
            0,
            Request::Multi(vec![
                create("/m", CreateMode::Persistent),
                create("/m/c", CreateMode::Persistent),
                Request::SetData {
                    path: "/m".into(),
                    data: b"v".to_vec(),
                    version: 0,
                },
                Request::Check {
                    path: "/m".into(),
                    version: 1,
                },
                delete("/m/c", 0),
            ]),
        );
        match applied.result {
            Ok(Response::Multi(results)) => assert!(results.iter().all(Result::is_ok)),
            r => panic!("unexpected {:?}", r),
        }
        let m = f.tree.stat("/m").unwrap();
        let zxid = applied.zxid.as_i64();
        assert_eq!((m.czxid, m.mzxid, m.pzxid), (zxid, zxid, zxid));
        assert_eq!(m.cversion, 2);
        assert_eq!(m.version, 1);
        assert_eq!(m.num_children, 0);
    }

    #[test]
    fn views_are_isolated() {
        let mut f = Feeder::new();
        f.create("/a", b"one").unwrap();
        let view = f.tree.view();
        f.run(
            0,
            Request::SetData {
                path: "/a".into(),
                data: b"two".to_vec(),
                version: -1,
            },
        );
        f.create("/b", b"").unwrap();

        assert_eq!(view.get("/a").unwrap().data(), b"one");
        assert!(view.get("/b").is_none());
        assert_eq!(view.last_zxid(), Zxid::new(1, 1));
        assert_eq!(f.tree.get("/a").unwrap().data(), b"two");
    }

    #[test]
    fn same_entries_same_tree() {
        let mut left = Feeder::new();
        let mut right = Feeder::new();
        let script = vec![
            create("/a", CreateMode::Persistent),
            create("/a/s", CreateMode::PersistentSequential),
            create("/a/s", CreateMode::PersistentSequential),
            delete("/a/s0000000000", -1),
            Request::CreateSession { timeout: 5 },
            create("/a/e", CreateMode::Ephemeral),
            Request::SetData {
                path: "/a".into(),
                data: b"x".to_vec(),
                version: 0,
            },
        ];
        for req in script {
            let l = left.run(1, req.clone());
            let r = right.run(1, req);
            assert_eq!(l.result, r.result);
        }
        assert_eq!(left.tree.view(), right.tree.view());
    }

    #[test]
    fn out_of_order_entries_are_refused() {
        let mut f = Feeder::new();
        f.create("/a", b"").unwrap();
        let stale = LogEntry {
            zxid: Zxid::new(1, 1),
            session_id: 0,
            time: 0,
            request: Request::CloseSession,
        };
        assert!(f.tree.apply(&stale).is_err());
    }

    #[test]
    fn rebuild_from_parts() {
        let mut f = Feeder::new();
        f.create("/a", b"").unwrap();
        f.create("/a/b", b"").unwrap();
        f.run(0, Request::CreateSession { timeout: 5 });
        f.run(1, create("/a/e", CreateMode::Ephemeral));
        let view = f.tree.view();

        let nodes = view
            .iter()
            .map(|(p, n)| (p.to_owned(), Node::from_stat(n.data().to_vec(), &n.stat())))
            .collect();
        let sessions = view.sessions().collect();
        let rebuilt =
            DataTree::from_parts(nodes, sessions, view.next_session_id(), view.last_zxid())
                .unwrap();
        assert_eq!(rebuilt.view(), view);
        assert_eq!(rebuilt.ephemerals(1), vec!["/a/e"]);

        let mut orphan = BTreeMap::new();
        orphan.insert("/".to_owned(), Node::default());
        orphan.insert("/x/y".to_owned(), Node::default());
        assert!(DataTree::from_parts(orphan, BTreeMap::new(), 1, Zxid::ZERO).is_err());
    }
}
