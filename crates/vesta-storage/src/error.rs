use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header in {file}: {reason}")]
    InvalidHeader {
        file: &'static str,
        reason: &'static str,
    },
    #[error("incompatible {file} version: expected {expected}, found {found}")]
    WrongVersion {
        file: &'static str,
        expected: u32,
        found: u32,
    },
    #[error("truncated {file}: expected at least {expected} bytes, found {found}")]
    Truncated {
        file: &'static str,
        expected: u64,
        found: u64,
    },
    #[error("store was not safely closed (connection magic {magic:#x})")]
    UncleanShutdown { magic: u32 },
    #[error("store file {0} is missing")]
    MissingFile(&'static str),
    #[error("corrupt name table: {0}")]
    CorruptNames(String),
    #[error("corrupt attribute page at offset {offset:#x}: {reason}")]
    CorruptAttribute { offset: u64, reason: &'static str },
    #[error("attributes file exceeds the addressable page range")]
    AttributesFull,
}

impl StoreError {
    /// Returns whether the on-disk store must be discarded and rebuilt from the delegate
    /// filesystem. Such stores are never repaired in place.
    pub fn requires_rebuild(&self) -> bool {
        match self {
            StoreError::Io(_) | StoreError::AttributesFull => false,
            StoreError::InvalidHeader { .. }
            | StoreError::WrongVersion { .. }
            | StoreError::Truncated { .. }
            | StoreError::UncleanShutdown { .. }
            | StoreError::MissingFile(_)
            | StoreError::CorruptNames(_)
            | StoreError::CorruptAttribute { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_require_rebuild_but_io_does_not() {
        assert!(StoreError::UncleanShutdown { magic: 1 }.requires_rebuild());
        assert!(StoreError::WrongVersion {
            file: "records",
            expected: 1,
            found: 2
        }
        .requires_rebuild());
        let io = StoreError::from(std::io::Error::other("disk on fire"));
        assert!(!io.requires_rebuild());
    }
}
