use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use vesta_core::{AttributeId, PageId};

use crate::error::StoreError;

const ATTRIBUTES_MAGIC: u32 = 0x4154_5452;
const ATTRIBUTES_VERSION: u32 = 1;
const FILE_HEADER_LEN: u64 = 16;

pub const PAGE_HEADER_LEN: usize = 16;
/// Payload capacities are rounded up to this many bytes, leaving room for small rewrites.
const PAGE_ALIGN: usize = 16;
const MIN_PAYLOAD_CAPACITY: usize = 32;

/// Decoded page header: `{attribute_id, next, capacity, len}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub attribute_id: AttributeId,
    pub next: PageId,
    pub capacity: u32,
    pub len: u32,
}

impl PageHeader {
    fn decode(bytes: &[u8; PAGE_HEADER_LEN]) -> Self {
        Self {
            attribute_id: AttributeId::from_raw(LittleEndian::read_u32(&bytes[0..])),
            next: PageId::from_raw(LittleEndian::read_u32(&bytes[4..])),
            capacity: LittleEndian::read_u32(&bytes[8..]),
            len: LittleEndian::read_u32(&bytes[12..]),
        }
    }

    fn encode(&self) -> [u8; PAGE_HEADER_LEN] {
        let mut out = [0u8; PAGE_HEADER_LEN];
        LittleEndian::write_u32(&mut out[0..], self.attribute_id.to_raw());
        LittleEndian::write_u32(&mut out[4..], self.next.to_raw());
        LittleEndian::write_u32(&mut out[8..], self.capacity);
        LittleEndian::write_u32(&mut out[12..], self.len);
        out
    }
}

/// Page-addressed storage for attribute blobs.
///
/// A page id is the byte offset of the page header. Pages are appended at the end of the file
/// and never moved, compacted or reused; deleting a page only tombstones it.
#[derive(Debug)]
pub struct AttributeStore {
    file: File,
    end: u64,
    released_pages: u32,
}

impl AttributeStore {
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut store = Self {
            file,
            end: FILE_HEADER_LEN,
            released_pages: 0,
        };
        store.write_file_header()?;
        store.file.sync_all()?;
        Ok(store)
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let end = file.metadata()?.len();
        if end < FILE_HEADER_LEN {
            return Err(StoreError::Truncated {
                file: "attributes",
                expected: FILE_HEADER_LEN,
                found: end,
            });
        }

        let mut header = [0u8; FILE_HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if LittleEndian::read_u32(&header[0..]) != ATTRIBUTES_MAGIC {
            return Err(StoreError::InvalidHeader {
                file: "attributes",
                reason: "bad magic",
            });
        }
        let version = LittleEndian::read_u32(&header[4..]);
        if version != ATTRIBUTES_VERSION {
            return Err(StoreError::WrongVersion {
                file: "attributes",
                expected: ATTRIBUTES_VERSION,
                found: version,
            });
        }
        if end > u64::from(u32::MAX) {
            return Err(StoreError::AttributesFull);
        }

        Ok(Self {
            file,
            end,
            released_pages: LittleEndian::read_u32(&header[8..]),
        })
    }

    /// Number of pages tombstoned over the life of the file.
    pub fn released_pages(&self) -> u32 {
        self.released_pages
    }

    /// Size of the attributes file in bytes.
    pub fn len_bytes(&self) -> u64 {
        self.end
    }

    pub fn page_header(&mut self, page: PageId) -> Result<PageHeader, StoreError> {
        self.check_page(page)?;
        let mut bytes = [0u8; PAGE_HEADER_LEN];
        self.file.seek(SeekFrom::Start(page.offset()))?;
        self.file.read_exact(&mut bytes)?;
        let header = PageHeader::decode(&bytes);
        if header.len > header.capacity
            || page.offset() + (PAGE_HEADER_LEN as u64) + u64::from(header.capacity) > self.end
        {
            return Err(StoreError::CorruptAttribute {
                offset: page.offset(),
                reason: "page extends past end of file",
            });
        }
        Ok(header)
    }

    /// Opens a stream over the payload of `page`.
    pub fn get_reader(&mut self, page: PageId) -> Result<AttributeReader, StoreError> {
        let header = self.page_header(page)?;
        if header.attribute_id == AttributeId::FREE {
            return Err(StoreError::CorruptAttribute {
                offset: page.offset(),
                reason: "read of a released page",
            });
        }
        let mut payload = vec![0u8; header.len as usize];
        self.file.read_exact(&mut payload)?;
        Ok(AttributeReader {
            header,
            payload: Cursor::new(payload),
        })
    }

    /// Starts a new page for `attribute_id` linked in front of `next`.
    ///
    /// The page id is reserved at the current end of the file. The writer borrows the store
    /// mutably, so nothing else can be appended before [`AttributeWriter::finish`] lays the
    /// page down; a writer dropped without finishing leaves the file untouched.
    pub fn get_writer(&mut self, attribute_id: AttributeId, next: PageId) -> AttributeWriter<'_> {
        assert!(
            attribute_id != AttributeId::FREE,
            "attribute id 0 is reserved for released pages"
        );
        AttributeWriter {
            page: PageId::from_raw(self.end as u32),
            attribute_id,
            next,
            buf: Vec::new(),
            store: self,
        }
    }

    /// Overwrites the payload of `page` if it fits the page's capacity.
    ///
    /// Returns `false` (writing nothing) when the payload is too large.
    pub fn rewrite_in_place(&mut self, page: PageId, payload: &[u8]) -> Result<bool, StoreError> {
        let mut header = self.page_header(page)?;
        if payload.len() > header.capacity as usize {
            return Ok(false);
        }
        header.len = payload.len() as u32;
        self.file.seek(SeekFrom::Start(page.offset()))?;
        self.file.write_all(&header.encode())?;
        self.file.write_all(payload)?;
        Ok(true)
    }

    /// Tombstones `page`. Its space is not reclaimed.
    pub fn delete(&mut self, page: PageId) -> Result<(), StoreError> {
        let mut header = self.page_header(page)?;
        if header.attribute_id == AttributeId::FREE {
            return Ok(());
        }
        header.attribute_id = AttributeId::FREE;
        header.next = PageId::NONE;
        header.len = 0;
        self.file.seek(SeekFrom::Start(page.offset()))?;
        self.file.write_all(&header.encode())?;

        self.released_pages = self.released_pages.saturating_add(1);
        self.write_file_header()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn check_page(&self, page: PageId) -> Result<(), StoreError> {
        assert!(!page.is_none(), "page id 0 is the attributes file header");
        if page.offset() < FILE_HEADER_LEN || page.offset() + PAGE_HEADER_LEN as u64 > self.end {
            return Err(StoreError::CorruptAttribute {
                offset: page.offset(),
                reason: "page offset out of range",
            });
        }
        Ok(())
    }

    fn write_file_header(&mut self) -> io::Result<()> {
        let mut header = [0u8; FILE_HEADER_LEN as usize];
        LittleEndian::write_u32(&mut header[0..], ATTRIBUTES_MAGIC);
        LittleEndian::write_u32(&mut header[4..], ATTRIBUTES_VERSION);
        LittleEndian::write_u32(&mut header[8..], self.released_pages);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)
    }
}

/// Payload stream of one attribute page.
#[derive(Debug)]
pub struct AttributeReader {
    header: PageHeader,
    payload: Cursor<Vec<u8>>,
}

impl AttributeReader {
    pub fn header(&self) -> PageHeader {
        self.header
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.payload.into_inner()
    }
}

impl Read for AttributeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.payload.read(buf)
    }
}

/// Buffered stream for a page that does not exist until [`AttributeWriter::finish`].
#[derive(Debug)]
pub struct AttributeWriter<'a> {
    store: &'a mut AttributeStore,
    page: PageId,
    attribute_id: AttributeId,
    next: PageId,
    buf: Vec<u8>,
}

impl AttributeWriter<'_> {
    /// The id the page will have once finished.
    pub fn page_id(&self) -> PageId {
        self.page
    }

    pub fn finish(self) -> Result<PageId, StoreError> {
        let capacity = page_capacity(self.buf.len());
        let page_end = self.store.end + (PAGE_HEADER_LEN + capacity) as u64;
        if page_end > u64::from(u32::MAX) {
            return Err(StoreError::AttributesFull);
        }

        let header = PageHeader {
            attribute_id: self.attribute_id,
            next: self.next,
            capacity: capacity as u32,
            len: self.buf.len() as u32,
        };
        let mut bytes = Vec::with_capacity(PAGE_HEADER_LEN + capacity);
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(&self.buf);
        bytes.resize(PAGE_HEADER_LEN + capacity, 0);

        self.store.file.seek(SeekFrom::Start(self.store.end))?;
        self.store.file.write_all(&bytes)?;
        self.store.end = page_end;
        Ok(self.page)
    }
}

impl Write for AttributeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn page_capacity(len: usize) -> usize {
    len.max(MIN_PAYLOAD_CAPACITY).div_ceil(PAGE_ALIGN) * PAGE_ALIGN
}
