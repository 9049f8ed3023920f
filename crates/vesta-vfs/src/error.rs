use std::io;

use thiserror::Error;
use vesta_storage::StoreError;

use crate::path::VfsPath;

#[derive(Debug, Error)]
pub enum VfsError {
    /// The delegate filesystem failed; the store was not touched.
    #[error(transparent)]
    Delegate(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("{0} is not a directory")]
    NotADirectory(VfsPath),

    #[error("{0} is a directory")]
    IsADirectory(VfsPath),

    #[error("{0} not found")]
    NotFound(VfsPath),

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("{0} already exists")]
    AlreadyExists(VfsPath),

    #[error("cannot move {from} into its own subtree at {to}")]
    MoveIntoSelf { from: VfsPath, to: VfsPath },

    #[error("refresh cancelled")]
    Cancelled,
}

pub type Result<T, E = VfsError> = std::result::Result<T, E>;
