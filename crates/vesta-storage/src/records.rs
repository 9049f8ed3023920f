use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::{MmapMut, MmapOptions};
use vesta_core::{NameId, PageId, RecordId};

use crate::error::StoreError;
use crate::header::{
    RecordFlags, RecordsHeader, ATTR_HEAD, CONTENT_HASH, FLAGS, LENGTH, MOD_COUNT, NAME, PARENT,
    RECORD_SIZE, SAFELY_CLOSED_MAGIC, TIMESTAMP, UNKNOWN_LENGTH,
};

const MIN_CAPACITY: u32 = 64;

/// Plain copy of every field of a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub parent: RecordId,
    pub name: NameId,
    pub flags: RecordFlags,
    pub attr_head: PageId,
    pub content_hash: u64,
    pub timestamp: i64,
    pub mod_count: u32,
    pub length: u32,
}

/// Fixed-stride array of record slots in a memory-mapped file.
///
/// No method takes a lock. Mutating methods take `&mut self`, which is how callers serialize
/// writers against each other and against readers.
pub struct RecordsFile {
    path: PathBuf,
    file: File,
    map: MmapMut,
    header: RecordsHeader,
    /// Number of slots covered by the current mapping.
    capacity: u32,
}

impl std::fmt::Debug for RecordsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordsFile")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl RecordsFile {
    /// Creates a fresh records file holding only the header and an empty root directory.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(u64::from(MIN_CAPACITY) * RECORD_SIZE as u64)?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };

        let mut records = Self {
            path: path.to_path_buf(),
            file,
            map,
            header: RecordsHeader::fresh(),
            capacity: MIN_CAPACITY,
        };
        records.write_header();

        let root = RecordId::ROOT.idx() * RECORD_SIZE;
        records.map[root..root + RECORD_SIZE].fill(0);
        LittleEndian::write_u32(
            &mut records.map[root + FLAGS..],
            RecordFlags::DIRECTORY.bits(),
        );
        LittleEndian::write_u32(&mut records.map[root + LENGTH..], UNKNOWN_LENGTH);
        records.map.flush()?;
        Ok(records)
    }

    /// Opens an existing records file and marks it as connected.
    ///
    /// Fails when the version tag does not match or the previous session did not close the
    /// file cleanly.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < (2 * RECORD_SIZE) as u64 {
            return Err(StoreError::Truncated {
                file: "records",
                expected: (2 * RECORD_SIZE) as u64,
                found: file_len,
            });
        }

        let file_slots = file_len / RECORD_SIZE as u64;
        let capacity = u32::try_from(file_slots).map_err(|_| StoreError::InvalidHeader {
            file: "records",
            reason: "file holds more slots than ids can address",
        })?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        let header = RecordsHeader::decode(&map[..RECORD_SIZE])?;
        header.validate(file_slots)?;

        let mut records = Self {
            path: path.to_path_buf(),
            file,
            map,
            header: RecordsHeader {
                connection: crate::header::CONNECTED_MAGIC,
                ..header
            },
            capacity,
        };
        records.write_header();
        records.map.flush_range(0, RECORD_SIZE)?;
        Ok(records)
    }

    /// Flushes every slot, then records the safely-closed magic.
    pub fn close(&mut self) -> Result<(), StoreError> {
        self.map.flush()?;
        self.header.connection = SAFELY_CLOSED_MAGIC;
        self.write_header();
        self.map.flush_range(0, RECORD_SIZE)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.map.flush()?;
        Ok(())
    }

    pub fn header(&self) -> RecordsHeader {
        self.header
    }

    pub fn global_mod_count(&self) -> u32 {
        self.header.global_mod_count
    }

    /// Next never-used id; every live or free record id is below it.
    pub fn extent(&self) -> u32 {
        self.header.extent
    }

    /// Pops the free list head, or extends the file by one slot.
    pub fn allocate(&mut self) -> Result<RecordId, StoreError> {
        let id = if self.header.free_head != 0 {
            let id = RecordId::from_raw(self.header.free_head);
            let next = self.next_free(id);
            self.header.free_head = next.to_raw();
            id
        } else {
            let id = RecordId::from_raw(self.header.extent);
            self.ensure_capacity(self.header.extent + 1)?;
            self.header.extent += 1;
            id
        };
        self.write_header();

        let offset = id.idx() * RECORD_SIZE;
        self.map[offset..offset + RECORD_SIZE].fill(0);
        LittleEndian::write_u32(&mut self.map[offset + LENGTH..], UNKNOWN_LENGTH);

        tracing::trace!(target: "vesta.storage", id = %id, "allocated record");
        Ok(id)
    }

    /// Zeroes the slot and pushes it onto the free list.
    ///
    /// The former parent's subtree counts as modified. Attribute pages must already be
    /// released by the caller.
    pub fn free(&mut self, id: RecordId) {
        assert!(id != RecordId::ROOT, "the root record cannot be deleted");
        let parent = self.parent(id);
        if !parent.is_none() {
            self.mark_modified(parent);
        }

        let offset = self.live_offset(id);
        self.map[offset..offset + RECORD_SIZE].fill(0);
        LittleEndian::write_u32(&mut self.map[offset + FLAGS..], RecordFlags::FREE.bits());
        // The parent slot doubles as the free-list link while the record is free.
        LittleEndian::write_u32(&mut self.map[offset + PARENT..], self.header.free_head);
        self.header.free_head = id.to_raw();
        self.write_header();

        tracing::trace!(target: "vesta.storage", id = %id, "freed record");
    }

    /// Returns whether `id` names a live (allocated, not freed) record.
    pub fn is_live(&self, id: RecordId) -> bool {
        !id.is_none()
            && id.to_raw() < self.header.extent
            && !self.raw_flags(id).contains(RecordFlags::FREE)
    }

    /// Ids currently on the free list, head first.
    pub fn free_list(&self) -> Vec<RecordId> {
        let mut out = Vec::new();
        let mut next = RecordId::from_raw(self.header.free_head);
        while !next.is_none() {
            assert!(
                out.len() < self.header.extent as usize,
                "free list is cyclic"
            );
            out.push(next);
            next = self.next_free(next);
        }
        out
    }

    pub fn record(&self, id: RecordId) -> Record {
        Record {
            id,
            parent: self.parent(id),
            name: self.name(id),
            flags: self.flags(id),
            attr_head: self.attr_head(id),
            content_hash: self.content_hash(id),
            timestamp: self.timestamp(id),
            mod_count: self.mod_count(id),
            length: self.length(id),
        }
    }

    pub fn parent(&self, id: RecordId) -> RecordId {
        RecordId::from_raw(self.read_u32(id, PARENT))
    }

    /// Free-list successor of a freed record; shares storage with the parent field.
    fn next_free(&self, id: RecordId) -> RecordId {
        assert!(
            self.raw_flags(id).contains(RecordFlags::FREE),
            "record {id} on the free list is not marked free"
        );
        let offset = self.slot_offset(id);
        RecordId::from_raw(LittleEndian::read_u32(&self.map[offset + PARENT..]))
    }

    pub fn name(&self, id: RecordId) -> NameId {
        NameId::from_raw(self.read_u32(id, NAME))
    }

    pub fn flags(&self, id: RecordId) -> RecordFlags {
        RecordFlags::from_bits(self.read_u32(id, FLAGS))
    }

    pub fn attr_head(&self, id: RecordId) -> PageId {
        PageId::from_raw(self.read_u32(id, ATTR_HEAD))
    }

    pub fn content_hash(&self, id: RecordId) -> u64 {
        let offset = self.live_offset(id);
        LittleEndian::read_u64(&self.map[offset + CONTENT_HASH..])
    }

    pub fn timestamp(&self, id: RecordId) -> i64 {
        let offset = self.live_offset(id);
        LittleEndian::read_i64(&self.map[offset + TIMESTAMP..])
    }

    pub fn mod_count(&self, id: RecordId) -> u32 {
        self.read_u32(id, MOD_COUNT)
    }

    pub fn length(&self, id: RecordId) -> u32 {
        self.read_u32(id, LENGTH)
    }

    pub fn set_parent(&mut self, id: RecordId, parent: RecordId) {
        self.write_u32(id, PARENT, parent.to_raw());
        self.mark_modified(id);
    }

    pub fn set_name(&mut self, id: RecordId, name: NameId) {
        self.write_u32(id, NAME, name.to_raw());
        self.mark_modified(id);
    }

    pub fn set_flags(&mut self, id: RecordId, flags: RecordFlags) {
        assert!(
            !flags.contains(RecordFlags::FREE),
            "the free flag is owned by the allocator"
        );
        self.write_u32(id, FLAGS, flags.bits());
        self.mark_modified(id);
    }

    pub fn set_attr_head(&mut self, id: RecordId, head: PageId) {
        self.write_u32(id, ATTR_HEAD, head.to_raw());
        self.mark_modified(id);
    }

    pub fn set_content_hash(&mut self, id: RecordId, hash: u64) {
        let offset = self.live_offset(id);
        LittleEndian::write_u64(&mut self.map[offset + CONTENT_HASH..], hash);
        self.mark_modified(id);
    }

    pub fn set_timestamp(&mut self, id: RecordId, timestamp: i64) {
        let offset = self.live_offset(id);
        LittleEndian::write_i64(&mut self.map[offset + TIMESTAMP..], timestamp);
        self.mark_modified(id);
    }

    pub fn set_length(&mut self, id: RecordId, length: u32) {
        self.write_u32(id, LENGTH, length);
        self.mark_modified(id);
    }

    /// Bumps the global counter and stamps its new value on `id` and every ancestor.
    pub fn mark_modified(&mut self, id: RecordId) {
        self.header.global_mod_count = self.header.global_mod_count.wrapping_add(1);
        let stamp = self.header.global_mod_count;
        self.write_header();

        let mut current = id;
        let mut depth = 0u32;
        while !current.is_none() {
            assert!(
                depth < self.header.extent,
                "parent chain of record {id} is cyclic"
            );
            self.write_u32(current, MOD_COUNT, stamp);
            current = self.parent(current);
            depth += 1;
        }
    }

    fn read_u32(&self, id: RecordId, field: usize) -> u32 {
        let offset = self.live_offset(id);
        LittleEndian::read_u32(&self.map[offset + field..])
    }

    fn write_u32(&mut self, id: RecordId, field: usize, value: u32) {
        let offset = self.live_offset(id);
        LittleEndian::write_u32(&mut self.map[offset + field..], value);
    }

    fn raw_flags(&self, id: RecordId) -> RecordFlags {
        let offset = self.slot_offset(id);
        RecordFlags::from_bits(LittleEndian::read_u32(&self.map[offset + FLAGS..]))
    }

    /// Absolute offset of a slot that may be live or free.
    fn slot_offset(&self, id: RecordId) -> usize {
        assert!(
            !id.is_none() && id.to_raw() < self.header.extent,
            "record id {id} out of range (extent {})",
            self.header.extent
        );
        id.idx() * RECORD_SIZE
    }

    /// Absolute offset of a live slot.
    fn live_offset(&self, id: RecordId) -> usize {
        let offset = self.slot_offset(id);
        assert!(
            !RecordFlags::from_bits(LittleEndian::read_u32(&self.map[offset + FLAGS..]))
                .contains(RecordFlags::FREE),
            "record {id} has been deleted"
        );
        offset
    }

    fn write_header(&mut self) {
        let header = self.header;
        header.encode(&mut self.map[..RECORD_SIZE]);
    }

    fn ensure_capacity(&mut self, slots: u32) -> Result<(), StoreError> {
        if slots <= self.capacity {
            return Ok(());
        }
        let new_capacity = slots.max(self.capacity.saturating_mul(2)).max(MIN_CAPACITY);
        self.map.flush()?;
        self.file
            .set_len(u64::from(new_capacity) * RECORD_SIZE as u64)?;
        self.map = unsafe { MmapOptions::new().map_mut(&self.file)? };
        self.capacity = new_capacity;
        tracing::debug!(
            target: "vesta.storage",
            path = %self.path.display(),
            capacity = new_capacity,
            "grew records file"
        );
        Ok(())
    }
}
