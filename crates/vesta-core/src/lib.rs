//! Core shared types for vesta.
//!
//! This crate is intentionally small: id newtypes shared by the store and the VFS overlay, the
//! content checksum, a wall-clock helper and a cooperative cancellation token.

mod cancel;
mod ids;
mod time;

pub use cancel::CancellationToken;
pub use ids::{AttributeId, NameId, PageId, RecordId};
pub use time::now_millis;

/// Version of the vesta crates, recorded in diagnostics.
pub const VESTA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 64-bit checksum of file contents as stored in a record's `content_hash` field.
///
/// This is the first 8 bytes (little-endian) of the BLAKE3 digest.
pub fn content_hash(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"hellp"));
        assert_ne!(content_hash(b""), 0);
    }
}
