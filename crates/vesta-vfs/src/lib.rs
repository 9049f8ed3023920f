//! Persistent virtual file system overlay for vesta.
//!
//! The overlay is responsible for:
//! - Presenting a tree of entries backed by a [`vesta_storage::RecordStore`], populated lazily
//!   from a delegate [`FileSystem`] the first time a directory is listed.
//! - Performing mutations (create, delete, rename, move, copy, write) against the delegate first
//!   and mirroring them into the store as [`ChangeEvent`] batches.
//! - Notifying [`BulkFileListener`]s before and after each batch.
//! - Reconciling the cached tree with the delegate through a [`RefreshSession`].

mod change;
mod content_cache;
mod error;
mod fs;
mod listener;
mod memory_fs;
mod path;
mod refresh;
mod vfs;

pub use change::{ChangeEvent, ChangeKind, PropertyChange};
pub use error::{Result, VfsError};
pub use fs::{FileAttributes, FileSystem, LocalFs, VolumeId};
pub use listener::{BulkFileListener, ChannelListener, VfsNotification};
pub use memory_fs::MemoryFs;
pub use path::{is_valid_name, VfsPath};
pub use refresh::{RefreshOptions, RefreshSession};
pub use vesta_core::{CancellationToken, RecordId};
pub use vesta_storage::OpenOutcome;
pub use vfs::PersistentVfs;
