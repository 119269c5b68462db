/// Represents a change on a replica's tree that a watch is able to respond to.
///
/// The `WatchedEvent` says exactly what happened and the path of the znode that was involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedEvent {
    /// The trigger that caused the watch to hit.
    pub event_type: WatchedEventType,
    /// The path of the znode that was involved.
    pub path: String,
}

impl WatchedEvent {
    pub(crate) fn new(event_type: WatchedEventType, path: impl Into<String>) -> Self {
        WatchedEvent {
            event_type,
            path: path.into(),
        }
    }
}

/// Enumeration of types of events that may occur on the znode.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchedEventType {
    /// Issued when a znode at a given path is created.
    NodeCreated = 1,
    /// Issued when a znode at a given path is deleted.
    NodeDeleted = 2,
    /// Issued when the data of a watched znode are altered. This event value is issued whenever a
    /// *set* operation occurs without an actual contents check, so there is no guarantee the data
    /// actually changed.
    NodeDataChanged = 3,
    /// Issued when the children of a watched znode are created or deleted. This event is not issued
    /// when the data within children is altered.
    NodeChildrenChanged = 4,
}

/// Describes what a watch is looking for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum WatchType {
    /// Watching for changes to children.
    Child,
    /// Watching for changes to data.
    Data,
    /// Watching for the creation of a node at the given path.
    Exist,
}

impl WatchType {
    /// Whether an event of the given type fires (and thereby consumes) a watch of this type.
    pub(crate) fn triggered_by(self, event: WatchedEventType) -> bool {
        match (self, event) {
            (WatchType::Child, WatchedEventType::NodeDeleted)
            | (WatchType::Child, WatchedEventType::NodeChildrenChanged) => true,
            (WatchType::Child, _) => false,
            (WatchType::Data, WatchedEventType::NodeDeleted)
            | (WatchType::Data, WatchedEventType::NodeDataChanged) => true,
            (WatchType::Data, _) => false,
            (WatchType::Exist, WatchedEventType::NodeChildrenChanged) => false,
            (WatchType::Exist, _) => true,
        }
    }
}
