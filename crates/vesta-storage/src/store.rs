use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use vesta_core::{AttributeId, NameId, PageId, RecordId};

use crate::attributes::AttributeStore;
use crate::error::StoreError;
use crate::header::{RecordFlags, UNKNOWN_LENGTH};
use crate::names::NameTable;
use crate::records::{Record, RecordsFile};

pub const RECORDS_FILE: &str = "records.dat";
pub const NAMES_FILE: &str = "names.dat";
pub const ATTRIBUTES_FILE: &str = "attributes.dat";

/// How [`RecordStore::open_or_rebuild`] obtained its store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// No store existed; fresh files were created.
    Created,
    /// The existing store was clean and has been reopened.
    Opened,
    /// The existing store was unusable and has been replaced by an empty one.
    Rebuilt { reason: String },
}

/// Persistent record store: records file, name table and attribute pages of one store
/// directory.
///
/// Like [`RecordsFile`], the store never locks. `&mut self` methods are the mutators; a
/// caller that shares the store across threads wraps it in its own lock.
#[derive(Debug)]
pub struct RecordStore {
    dir: PathBuf,
    records: RecordsFile,
    names: NameTable,
    attributes: AttributeStore,
}

impl RecordStore {
    /// Opens the store in `dir`, creating it when no store files exist.
    ///
    /// Any format problem, version mismatch or sign of an unclean shutdown is returned as an
    /// error for which [`StoreError::requires_rebuild`] is `true`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::open_with_outcome(dir).map(|(store, _)| store)
    }

    /// Like [`RecordStore::open`], also reporting whether the store was created or reopened.
    pub fn open_with_outcome(dir: &Path) -> Result<(Self, OpenOutcome), StoreError> {
        Self::open_inner(dir)
    }

    /// Like [`RecordStore::open`], but discards and recreates a store that cannot be trusted.
    pub fn open_or_rebuild(dir: &Path) -> Result<(Self, OpenOutcome), StoreError> {
        match Self::open_inner(dir) {
            Ok(opened) => Ok(opened),
            Err(err) if err.requires_rebuild() => {
                tracing::warn!(
                    target: "vesta.storage",
                    dir = %dir.display(),
                    error = %err,
                    "discarding persistent store; it will be rebuilt from the delegate filesystem"
                );
                Self::remove_files(dir)?;
                let store = Self::create(dir)?;
                Ok((
                    store,
                    OpenOutcome::Rebuilt {
                        reason: err.to_string(),
                    },
                ))
            }
            Err(err) => Err(err),
        }
    }

    fn open_inner(dir: &Path) -> Result<(Self, OpenOutcome), StoreError> {
        fs::create_dir_all(dir)?;
        let present = [RECORDS_FILE, NAMES_FILE, ATTRIBUTES_FILE]
            .map(|name| dir.join(name).exists());
        if present.iter().all(|exists| !exists) {
            return Ok((Self::create(dir)?, OpenOutcome::Created));
        }
        if let Some(missing) = [RECORDS_FILE, NAMES_FILE, ATTRIBUTES_FILE]
            .iter()
            .zip(present)
            .find_map(|(name, exists)| (!exists).then_some(*name))
        {
            return Err(StoreError::MissingFile(missing));
        }

        // The records file goes first: opening it stamps the connected magic, so a failure
        // below still leaves the store marked as not safely closed.
        let records = RecordsFile::open(&dir.join(RECORDS_FILE))?;
        let names = NameTable::open(&dir.join(NAMES_FILE))?;
        let attributes = AttributeStore::open(&dir.join(ATTRIBUTES_FILE))?;

        tracing::debug!(
            target: "vesta.storage",
            dir = %dir.display(),
            extent = records.extent(),
            names = names.len(),
            "opened persistent store"
        );
        Ok((
            Self {
                dir: dir.to_path_buf(),
                records,
                names,
                attributes,
            },
            OpenOutcome::Opened,
        ))
    }

    fn create(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let names = NameTable::create(&dir.join(NAMES_FILE))?;
        let attributes = AttributeStore::create(&dir.join(ATTRIBUTES_FILE))?;
        let records = RecordsFile::create(&dir.join(RECORDS_FILE))?;
        tracing::debug!(target: "vesta.storage", dir = %dir.display(), "created persistent store");
        Ok(Self {
            dir: dir.to_path_buf(),
            records,
            names,
            attributes,
        })
    }

    fn remove_files(dir: &Path) -> Result<(), StoreError> {
        for name in [RECORDS_FILE, NAMES_FILE, ATTRIBUTES_FILE] {
            match fs::remove_file(dir.join(name)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Flushes all files and marks the store safely closed.
    ///
    /// Dropping a store without calling `close` leaves it marked as connected, and the next
    /// open treats it as an unclean shutdown.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.names.flush()?;
        self.attributes.flush()?;
        self.records.close()?;
        tracing::debug!(
            target: "vesta.storage",
            dir = %self.dir.display(),
            "closed persistent store"
        );
        Ok(())
    }

    /// Flushes all files without changing the connection state.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.names.flush()?;
        self.attributes.flush()?;
        self.records.flush()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // --- names ---

    pub fn intern(&mut self, name: &str) -> Result<NameId, StoreError> {
        self.names.intern(name)
    }

    pub fn resolve(&self, id: NameId) -> &str {
        self.names.resolve(id)
    }

    /// Resolved name of a record.
    pub fn name_of(&self, id: RecordId) -> &str {
        self.names.resolve(self.records.name(id))
    }

    // --- records ---

    pub fn allocate(&mut self) -> Result<RecordId, StoreError> {
        self.records.allocate()
    }

    /// Releases the attribute chain of `id` and returns the slot to the free list.
    ///
    /// Children are not visited; see [`RecordStore::delete_recursive`].
    pub fn delete(&mut self, id: RecordId) -> Result<(), StoreError> {
        let mut page = self.records.attr_head(id);
        while !page.is_none() {
            let next = self.attributes.page_header(page)?.next;
            self.attributes.delete(page)?;
            page = next;
        }
        self.records.free(id);
        Ok(())
    }

    /// Deletes every descendant of `id` depth-first, then `id` itself.
    ///
    /// The parent's children list is left alone; callers that keep one update it themselves.
    pub fn delete_recursive(&mut self, id: RecordId) -> Result<(), StoreError> {
        for child in self.children(id)? {
            self.delete_recursive(child)?;
        }
        self.delete(id)
    }

    pub fn is_live(&self, id: RecordId) -> bool {
        self.records.is_live(id)
    }

    pub fn record(&self, id: RecordId) -> Record {
        self.records.record(id)
    }

    pub fn parent(&self, id: RecordId) -> RecordId {
        self.records.parent(id)
    }

    pub fn set_parent(&mut self, id: RecordId, parent: RecordId) {
        self.records.set_parent(id, parent);
    }

    pub fn name(&self, id: RecordId) -> NameId {
        self.records.name(id)
    }

    pub fn set_name(&mut self, id: RecordId, name: NameId) {
        self.records.set_name(id, name);
    }

    pub fn flags(&self, id: RecordId) -> RecordFlags {
        self.records.flags(id)
    }

    pub fn set_flags(&mut self, id: RecordId, flags: RecordFlags) {
        self.records.set_flags(id, flags);
    }

    pub fn is_directory(&self, id: RecordId) -> bool {
        self.records.flags(id).contains(RecordFlags::DIRECTORY)
    }

    pub fn children_cached(&self, id: RecordId) -> bool {
        self.records.flags(id).contains(RecordFlags::CHILDREN_CACHED)
    }

    pub fn content_hash(&self, id: RecordId) -> u64 {
        self.records.content_hash(id)
    }

    pub fn set_content_hash(&mut self, id: RecordId, hash: u64) {
        self.records.set_content_hash(id, hash);
    }

    pub fn timestamp(&self, id: RecordId) -> i64 {
        self.records.timestamp(id)
    }

    pub fn set_timestamp(&mut self, id: RecordId, timestamp: i64) {
        self.records.set_timestamp(id, timestamp);
    }

    /// Cached content length, `None` when unknown.
    pub fn length(&self, id: RecordId) -> Option<u64> {
        match self.records.length(id) {
            UNKNOWN_LENGTH => None,
            len => Some(u64::from(len)),
        }
    }

    /// Caches the content length; lengths that do not fit the field are stored as unknown.
    pub fn set_length(&mut self, id: RecordId, length: Option<u64>) {
        let raw = length
            .and_then(|len| u32::try_from(len).ok())
            .filter(|len| *len != UNKNOWN_LENGTH)
            .unwrap_or(UNKNOWN_LENGTH);
        self.records.set_length(id, raw);
    }

    pub fn mod_count(&self, id: RecordId) -> u32 {
        self.records.mod_count(id)
    }

    pub fn global_mod_count(&self) -> u32 {
        self.records.global_mod_count()
    }

    /// Returns whether anything in the subtree of `id` changed after the global counter was
    /// `since`.
    pub fn changed_since(&self, id: RecordId, since: u32) -> bool {
        self.records.mod_count(id) > since
    }

    pub fn free_list(&self) -> Vec<RecordId> {
        self.records.free_list()
    }

    /// Number of live records, the root included.
    pub fn live_record_count(&self) -> usize {
        (self.records.extent() as usize - 1) - self.records.free_list().len()
    }

    // --- attributes ---

    /// Maps an attribute name to its key, interning the name.
    pub fn attribute_id(&mut self, name: &str) -> Result<AttributeId, StoreError> {
        Ok(AttributeId::for_name(self.names.intern(name)?))
    }

    /// Reads the newest blob stored under `key` for `id`.
    pub fn read_attribute(
        &mut self,
        id: RecordId,
        key: AttributeId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        match self.find_attribute_page(id, key)? {
            Some(page) => {
                let mut bytes = Vec::new();
                self.attributes.get_reader(page)?.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    /// Opens a buffered output for `key` on `id`; the blob is stored by
    /// [`AttributeOutput::close`].
    pub fn write_attribute(&mut self, id: RecordId, key: AttributeId) -> AttributeOutput<'_> {
        assert!(self.records.is_live(id), "record {id} is not live");
        AttributeOutput {
            store: self,
            id,
            key,
            buf: Vec::new(),
        }
    }

    pub fn write_attribute_bytes(
        &mut self,
        id: RecordId,
        key: AttributeId,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let mut out = self.write_attribute(id, key);
        out.write_all(bytes)?;
        out.close()
    }

    fn find_attribute_page(
        &mut self,
        id: RecordId,
        key: AttributeId,
    ) -> Result<Option<PageId>, StoreError> {
        let mut page = self.records.attr_head(id);
        while !page.is_none() {
            let header = self.attributes.page_header(page)?;
            if header.attribute_id == key {
                return Ok(Some(page));
            }
            page = header.next;
        }
        Ok(None)
    }

    fn store_attribute(
        &mut self,
        id: RecordId,
        key: AttributeId,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        if let Some(page) = self.find_attribute_page(id, key)? {
            if self.attributes.rewrite_in_place(page, payload)? {
                self.records.mark_modified(id);
                return Ok(());
            }
        }

        // Either no page holds `key` yet or the payload outgrew it: the fresh page becomes the
        // head and shadows any older page for the same key further down the chain.
        let head = self.records.attr_head(id);
        let mut writer = self.attributes.get_writer(key, head);
        writer.write_all(payload)?;
        let page = writer.finish()?;
        self.records.set_attr_head(id, page);
        Ok(())
    }

    // --- children ---

    /// Children ids recorded for `id`; empty when no list has been written.
    pub fn children(&mut self, id: RecordId) -> Result<Vec<RecordId>, StoreError> {
        let Some(bytes) = self.read_attribute(id, AttributeId::CHILDREN)? else {
            return Ok(Vec::new());
        };
        decode_children(&bytes).map_err(|_| StoreError::CorruptAttribute {
            offset: self.records.attr_head(id).offset(),
            reason: "malformed children list",
        })
    }

    pub fn set_children(&mut self, id: RecordId, children: &[RecordId]) -> Result<(), StoreError> {
        let bytes = encode_children(children)?;
        self.write_attribute_bytes(id, AttributeId::CHILDREN, &bytes)
    }

    /// Finds a cached child of `parent` by name.
    pub fn find_child(
        &mut self,
        parent: RecordId,
        name: &str,
    ) -> Result<Option<RecordId>, StoreError> {
        let Some(name_id) = self.names.get(name) else {
            return Ok(None);
        };
        Ok(self
            .children(parent)?
            .into_iter()
            .find(|child| self.records.name(*child) == name_id))
    }
}

/// Buffered attribute output returned by [`RecordStore::write_attribute`].
///
/// Dropping it without calling [`AttributeOutput::close`] discards the written bytes.
pub struct AttributeOutput<'a> {
    store: &'a mut RecordStore,
    id: RecordId,
    key: AttributeId,
    buf: Vec<u8>,
}

impl AttributeOutput<'_> {
    pub fn close(self) -> Result<(), StoreError> {
        self.store.store_attribute(self.id, self.key, &self.buf)
    }
}

impl Write for AttributeOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn encode_children(children: &[RecordId]) -> io::Result<Vec<u8>> {
    let count = u32::try_from(children.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many children"))?;
    let mut out = Vec::with_capacity(4 + 4 * children.len());
    out.write_u32::<LittleEndian>(count)?;
    for child in children {
        out.write_u32::<LittleEndian>(child.to_raw())?;
    }
    Ok(out)
}

fn decode_children(mut bytes: &[u8]) -> io::Result<Vec<RecordId>> {
    let count = bytes.read_u32::<LittleEndian>()? as usize;
    if bytes.len() != count * 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "children count does not match payload",
        ));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(RecordId::from_raw(bytes.read_u32::<LittleEndian>()?));
    }
    Ok(out)
}
