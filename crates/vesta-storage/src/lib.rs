//! Persistent record store backing the vesta virtual file system.
//!
//! ## Format
//! A store is a directory holding three cooperating files:
//! - `records.dat`: a memory-mapped array of fixed-size (40 byte) little-endian slots. Slot 0 is
//!   the header (version, free-list head, global modification counter, connection magic, extent);
//!   slot 1 is the root. Each record holds parent id, name id, flags, attribute-chain head,
//!   content hash (8 bytes), timestamp (8 bytes), modification counter and cached length.
//! - `names.dat`: an append-only log of interned strings. Ids follow log order.
//! - `attributes.dat`: attribute pages addressed by byte offset. Each record owns a singly
//!   linked chain of pages; the children list of a directory is one of them.
//!
//! ## Crash detection
//! Opening a store writes a "connected" magic into the header and a clean
//! [`RecordStore::close`] replaces it with "safely closed". Finding anything else on open, or a
//! version mismatch, makes the store untrustworthy: [`RecordStore::open_or_rebuild`] discards
//! it instead of attempting repair.
//!
//! ## Modification counters
//! Every record mutation bumps a global counter and stamps the new value on the record and all
//! of its ancestors, so "did anything under this directory change since counter X" is a single
//! field read.

mod attributes;
mod error;
mod header;
mod names;
mod records;
mod store;

pub use attributes::{AttributeReader, AttributeStore, AttributeWriter, PageHeader};
pub use error::StoreError;
pub use header::{
    RecordFlags, RecordsHeader, CONNECTED_MAGIC, RECORDS_VERSION, RECORD_SIZE,
    SAFELY_CLOSED_MAGIC, UNKNOWN_LENGTH,
};
pub use names::NameTable;
pub use records::{Record, RecordsFile};
pub use store::{
    AttributeOutput, OpenOutcome, RecordStore, ATTRIBUTES_FILE, NAMES_FILE, RECORDS_FILE,
};
pub use vesta_core::{AttributeId, NameId, PageId, RecordId};
