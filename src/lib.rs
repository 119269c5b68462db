//! A replicated, ZooKeeper-compatible keeper store.
//!
//! The store keeps a tree of *znodes*, each holding a small blob of data and the usual ZooKeeper
//! [`Stat`] metadata. Every change is an entry in a totally ordered, replicated log: an
//! [`Ensemble`] of [`Replica`]s agrees on the order, each replica writes the entry to its
//! transaction log, and only then applies it to its [`DataTree`]. Applying an entry depends on
//! nothing but the tree and the entry, so all replicas hold the same state after the same entries.
//!
//! Replicas periodically write snapshots of their tree, either inline with commits
//! ([`SnapshotMode::Sync`]) or from a copy-on-write view in the background
//! ([`SnapshotMode::Async`]). On startup a replica loads its newest valid snapshot and replays
//! the log past it; it only starts serving once that succeeded.
//!
//! ```no_run
//! # async fn run() -> Result<(), failure::Error> {
//! use tokio_keeper::*;
//!
//! let configs = (1..=3)
//!     .map(|id| ReplicaConfig::new(id, format!("/var/lib/keeper/{}", id)))
//!     .collect();
//! let mut keeper = Ensemble::start(configs, slog::Logger::root(slog::Discard, slog::o!())).await?;
//!
//! let path = keeper
//!     .create("/example", &b"hello"[..], CreateMode::Persistent)
//!     .await?
//!     .expect("node already exists");
//! assert_eq!(path, "/example");
//!
//! let (data, stat) = keeper.get_data("/example")?.expect("node was just created");
//! assert_eq!(data, b"hello");
//! assert_eq!(stat.version, 0);
//!
//! keeper.restart_all().await?;
//! assert_eq!(keeper.get_data("/example")?.map(|(_, s)| s), Some(stat));
//! # Ok(())
//! # }
//! ```

mod config;
mod data_tree;
mod ensemble;
pub mod error;
mod hasher;
mod proto;
mod recovery;
mod replica;
mod snapshot;
mod transform;
mod txn_log;
mod types;

pub use crate::config::{ReplicaConfig, SnapshotMode};
pub use crate::data_tree::{Applied, DataTree, Node, TreeView};
pub use crate::ensemble::{Ensemble, MultiBuilder, Peer};
pub use crate::proto::{Request, Response, ZkError};
pub use crate::recovery::RecoveryState;
pub use crate::replica::{Replica, WithWatcher};
pub use crate::txn_log::{LogEntry, LogReader, TxnLog};
pub use crate::types::{CreateMode, MultiResponse, Stat, WatchedEvent, WatchedEventType, Zxid};
