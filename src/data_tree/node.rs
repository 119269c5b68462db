use std::collections::BTreeSet;

use crate::Stat;

/// One entry in the tree.
///
/// Parents are found by path, never by pointer, so a node only knows the names of its
/// children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    pub(crate) data: Vec<u8>,
    pub(crate) children: BTreeSet<String>,
    pub(crate) czxid: i64,
    pub(crate) mzxid: i64,
    pub(crate) pzxid: i64,
    pub(crate) ctime: i64,
    pub(crate) mtime: i64,
    pub(crate) version: i32,
    pub(crate) cversion: i32,
    pub(crate) aversion: i32,
    pub(crate) ephemeral_owner: i64,
}

impl Node {
    /// The node's payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Names of the node's children, in sorted order.
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    /// The node's metadata. Length and child count are taken from the node itself.
    pub fn stat(&self) -> Stat {
        Stat {
            czxid: self.czxid,
            mzxid: self.mzxid,
            ctime: self.ctime,
            mtime: self.mtime,
            version: self.version,
            cversion: self.cversion,
            aversion: self.aversion,
            ephemeral_owner: self.ephemeral_owner,
            data_length: self.data.len() as i32,
            num_children: self.children.len() as i32,
            pzxid: self.pzxid,
        }
    }

    pub(crate) fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }

    /// Rebuilds a childless node from stored metadata.
    pub(crate) fn from_stat(data: Vec<u8>, stat: &Stat) -> Self {
        Node {
            data,
            children: BTreeSet::new(),
            czxid: stat.czxid,
            mzxid: stat.mzxid,
            pzxid: stat.pzxid,
            ctime: stat.ctime,
            mtime: stat.mtime,
            version: stat.version,
            cversion: stat.cversion,
            aversion: stat.aversion,
            ephemeral_owner: stat.ephemeral_owner,
        }
    }
}
