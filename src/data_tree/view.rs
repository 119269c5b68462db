use std::collections::BTreeMap;
use std::sync::Arc;

use super::Node;
use crate::{Stat, Zxid};

/// An immutable point-in-time view of a [`DataTree`](super::DataTree).
///
/// Taking a view is O(1): it shares the tree's node map. The first mutation applied after a view
/// was taken copies the map's spine, and each touched node is copied before it changes, so the
/// view never observes later writes.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeView {
    pub(super) nodes: Arc<BTreeMap<String, Arc<Node>>>,
    pub(super) sessions: Arc<BTreeMap<i64, i32>>,
    pub(super) next_session_id: i64,
    pub(super) last_zxid: Zxid,
}

impl TreeView {
    /// The last entry reflected in this view.
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

    /// All nodes in path order, root included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(p, n)| (p.as_str(), &**n))
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True only for a tree without even a root, which never happens for a live tree.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Open sessions and their timeouts.
    pub fn sessions(&self) -> impl Iterator<Item = (i64, i32)> + '_ {
        self.sessions.iter().map(|(&id, &timeout)| (id, timeout))
    }

    pub(crate) fn next_session_id(&self) -> i64 {
        self.next_session_id
    }
}
