use vesta_core::RecordId;

use crate::fs::FileAttributes;
use crate::path::VfsPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Deleted,
    ContentChanged,
    PropertyChanged,
    Moved,
    Copied,
}

/// A property of an entry whose old and new values travel with the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyChange {
    Name { old: String, new: String },
    Writable { old: bool, new: bool },
}

/// One filesystem mutation, used both to update the store and to notify listeners.
///
/// `path` is always the path of the affected entry as seen before the event is applied, except
/// for `Created`, `Moved` and `Copied`, which carry the path the entry has afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created {
        parent: RecordId,
        name: String,
        path: VfsPath,
        attributes: FileAttributes,
    },
    Deleted {
        entry: RecordId,
        path: VfsPath,
    },
    ContentChanged {
        entry: RecordId,
        path: VfsPath,
        old_timestamp: i64,
        new_timestamp: i64,
        /// Length of the new contents when the producer already knows it.
        new_length: Option<u64>,
    },
    PropertyChanged {
        entry: RecordId,
        path: VfsPath,
        change: PropertyChange,
    },
    Moved {
        entry: RecordId,
        old_parent: RecordId,
        new_parent: RecordId,
        path: VfsPath,
    },
    Copied {
        original: RecordId,
        new_parent: RecordId,
        name: String,
        path: VfsPath,
        attributes: FileAttributes,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Created { .. } => ChangeKind::Created,
            ChangeEvent::Deleted { .. } => ChangeKind::Deleted,
            ChangeEvent::ContentChanged { .. } => ChangeKind::ContentChanged,
            ChangeEvent::PropertyChanged { .. } => ChangeKind::PropertyChanged,
            ChangeEvent::Moved { .. } => ChangeKind::Moved,
            ChangeEvent::Copied { .. } => ChangeKind::Copied,
        }
    }

    pub fn path(&self) -> &VfsPath {
        match self {
            ChangeEvent::Created { path, .. }
            | ChangeEvent::Deleted { path, .. }
            | ChangeEvent::ContentChanged { path, .. }
            | ChangeEvent::PropertyChanged { path, .. }
            | ChangeEvent::Moved { path, .. }
            | ChangeEvent::Copied { path, .. } => path,
        }
    }
}
