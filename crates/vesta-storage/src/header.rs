//! Layout of the records file header and record slots.
//!
//! The header lives in slot 0, so a record's absolute offset is always `id * RECORD_SIZE`.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::StoreError;

pub const RECORDS_VERSION: u32 = 3;

/// Written to the header while the store is open.
pub const CONNECTED_MAGIC: u32 = 0x12ad_34e4;
/// Replaces [`CONNECTED_MAGIC`] on a clean close.
pub const SAFELY_CLOSED_MAGIC: u32 = 0x1f2f_3f4f;

// Header fields (slot 0).
const HEADER_VERSION: usize = 0;
const HEADER_FREE_HEAD: usize = HEADER_VERSION + 4;
const HEADER_GLOBAL_MOD_COUNT: usize = HEADER_FREE_HEAD + 4;
const HEADER_CONNECTION: usize = HEADER_GLOBAL_MOD_COUNT + 4;
const HEADER_EXTENT: usize = HEADER_CONNECTION + 4;
pub const HEADER_LEN: usize = HEADER_EXTENT + 4;

// Record fields.
pub(crate) const PARENT: usize = 0;
pub(crate) const NAME: usize = PARENT + 4;
pub(crate) const FLAGS: usize = NAME + 4;
pub(crate) const ATTR_HEAD: usize = FLAGS + 4;
pub(crate) const CONTENT_HASH: usize = ATTR_HEAD + 4;
pub(crate) const TIMESTAMP: usize = CONTENT_HASH + 8;
pub(crate) const MOD_COUNT: usize = TIMESTAMP + 8;
pub(crate) const LENGTH: usize = MOD_COUNT + 4;
pub const RECORD_SIZE: usize = LENGTH + 4;

const _: () = assert!(HEADER_LEN <= RECORD_SIZE);

/// Sentinel stored in the length field when the content length is not known yet.
pub const UNKNOWN_LENGTH: u32 = u32::MAX;

/// In-process mirror of the header slot.
///
/// Every change goes through [`crate::records::RecordsFile`], which writes the slot back
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordsHeader {
    pub version: u32,
    /// Head of the free list, `0` when empty.
    pub free_head: u32,
    pub global_mod_count: u32,
    pub connection: u32,
    /// Number of slots ever handed out (including slot 0); the next never-used id.
    pub extent: u32,
}

impl RecordsHeader {
    pub fn fresh() -> Self {
        Self {
            version: RECORDS_VERSION,
            free_head: 0,
            global_mod_count: 0,
            connection: CONNECTED_MAGIC,
            // Header slot plus the root record.
            extent: 2,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < HEADER_LEN {
            return Err(StoreError::Truncated {
                file: "records",
                expected: HEADER_LEN as u64,
                found: bytes.len() as u64,
            });
        }
        Ok(Self {
            version: LittleEndian::read_u32(&bytes[HEADER_VERSION..]),
            free_head: LittleEndian::read_u32(&bytes[HEADER_FREE_HEAD..]),
            global_mod_count: LittleEndian::read_u32(&bytes[HEADER_GLOBAL_MOD_COUNT..]),
            connection: LittleEndian::read_u32(&bytes[HEADER_CONNECTION..]),
            extent: LittleEndian::read_u32(&bytes[HEADER_EXTENT..]),
        })
    }

    pub fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_u32(&mut out[HEADER_VERSION..], self.version);
        LittleEndian::write_u32(&mut out[HEADER_FREE_HEAD..], self.free_head);
        LittleEndian::write_u32(&mut out[HEADER_GLOBAL_MOD_COUNT..], self.global_mod_count);
        LittleEndian::write_u32(&mut out[HEADER_CONNECTION..], self.connection);
        LittleEndian::write_u32(&mut out[HEADER_EXTENT..], self.extent);
    }

    /// Checks the version tag and the connection handshake of a header read from disk.
    pub fn validate(&self, file_slots: u64) -> Result<(), StoreError> {
        if self.version != RECORDS_VERSION {
            return Err(StoreError::WrongVersion {
                file: "records",
                expected: RECORDS_VERSION,
                found: self.version,
            });
        }

        match self.connection {
            SAFELY_CLOSED_MAGIC => {}
            CONNECTED_MAGIC => {
                return Err(StoreError::UncleanShutdown {
                    magic: self.connection,
                })
            }
            _ => {
                return Err(StoreError::InvalidHeader {
                    file: "records",
                    reason: "unknown connection magic",
                })
            }
        }

        if self.extent < 2 {
            return Err(StoreError::InvalidHeader {
                file: "records",
                reason: "record extent does not cover the root",
            });
        }
        if u64::from(self.extent) > file_slots {
            return Err(StoreError::Truncated {
                file: "records",
                expected: u64::from(self.extent) * RECORD_SIZE as u64,
                found: file_slots * RECORD_SIZE as u64,
            });
        }
        if self.free_head >= self.extent {
            return Err(StoreError::InvalidHeader {
                file: "records",
                reason: "free list head out of range",
            });
        }
        Ok(())
    }
}

/// Per-record flag bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RecordFlags(u32);

impl RecordFlags {
    pub const CHILDREN_CACHED: RecordFlags = RecordFlags(1 << 0);
    pub const DIRECTORY: RecordFlags = RecordFlags(1 << 1);
    pub const READ_ONLY: RecordFlags = RecordFlags(1 << 2);
    /// Set while the slot is on the free list.
    pub(crate) const FREE: RecordFlags = RecordFlags(1 << 31);

    pub const fn empty() -> Self {
        RecordFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        RecordFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: RecordFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn with(self, other: RecordFlags, on: bool) -> Self {
        if on {
            RecordFlags(self.0 | other.0)
        } else {
            RecordFlags(self.0 & !other.0)
        }
    }
}

impl std::ops::BitOr for RecordFlags {
    type Output = RecordFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        RecordFlags(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for RecordFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::CHILDREN_CACHED) {
            names.push("CHILDREN_CACHED");
        }
        if self.contains(Self::DIRECTORY) {
            names.push("DIRECTORY");
        }
        if self.contains(Self::READ_ONLY) {
            names.push("READ_ONLY");
        }
        if self.contains(Self::FREE) {
            names.push("FREE");
        }
        write!(f, "RecordFlags({})", names.join(" | "))
    }
}
