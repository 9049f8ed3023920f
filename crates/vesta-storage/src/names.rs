use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::HashMap;
use vesta_core::NameId;

use crate::error::StoreError;

const NAMES_MAGIC: u32 = 0x4e41_4d45;
const NAMES_VERSION: u32 = 1;
const NAMES_HEADER_LEN: u64 = 8;
/// Upper bound for a single interned string; larger length prefixes mean corruption.
const MAX_NAME_LEN: u32 = 64 * 1024;

/// Durable string interning table.
///
/// The backing file is an append-only log of length-prefixed UTF-8 strings. Ids are assigned in
/// log order starting at 1, so replaying the log on open reproduces every id exactly; the
/// string-to-id index is rebuilt in memory during that replay.
#[derive(Debug)]
pub struct NameTable {
    log: BufWriter<File>,
    names: Vec<Box<str>>,
    index: HashMap<Box<str>, NameId>,
}

impl NameTable {
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_u32::<LittleEndian>(NAMES_MAGIC)?;
        file.write_u32::<LittleEndian>(NAMES_VERSION)?;
        file.sync_all()?;
        Ok(Self {
            log: BufWriter::new(file),
            names: Vec::new(),
            index: HashMap::new(),
        })
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).append(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < NAMES_HEADER_LEN {
            return Err(StoreError::Truncated {
                file: "names",
                expected: NAMES_HEADER_LEN,
                found: file_len,
            });
        }

        let mut reader = BufReader::new(&file);
        if reader.read_u32::<LittleEndian>()? != NAMES_MAGIC {
            return Err(StoreError::InvalidHeader {
                file: "names",
                reason: "bad magic",
            });
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != NAMES_VERSION {
            return Err(StoreError::WrongVersion {
                file: "names",
                expected: NAMES_VERSION,
                found: version,
            });
        }

        let mut names = Vec::new();
        let mut index = HashMap::new();
        let mut consumed = NAMES_HEADER_LEN;
        while consumed < file_len {
            let len = reader.read_u32::<LittleEndian>().map_err(truncated_entry)?;
            if len > MAX_NAME_LEN || consumed + 4 + u64::from(len) > file_len {
                return Err(StoreError::CorruptNames(format!(
                    "entry {} at offset {consumed} claims {len} bytes",
                    names.len() + 1
                )));
            }
            let mut bytes = vec![0u8; len as usize];
            reader.read_exact(&mut bytes).map_err(truncated_entry)?;
            let name = String::from_utf8(bytes)
                .map_err(|err| StoreError::CorruptNames(err.to_string()))?
                .into_boxed_str();

            let id = NameId::from_raw(names.len() as u32 + 1);
            index.insert(name.clone(), id);
            names.push(name);
            consumed += 4 + u64::from(len);
        }
        drop(reader);

        tracing::debug!(target: "vesta.storage", names = names.len(), "loaded name table");
        Ok(Self {
            log: BufWriter::new(file),
            names,
            index,
        })
    }

    /// Returns the id for `name`, appending it to the log the first time it is seen.
    pub fn intern(&mut self, name: &str) -> Result<NameId, StoreError> {
        if name.is_empty() {
            return Ok(NameId::EMPTY);
        }
        if let Some(&id) = self.index.get(name) {
            return Ok(id);
        }

        let len = u32::try_from(name.len())
            .ok()
            .filter(|len| *len <= MAX_NAME_LEN)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("name of {} bytes is too long to intern", name.len()),
                )
            })?;
        self.log.write_u32::<LittleEndian>(len)?;
        self.log.write_all(name.as_bytes())?;

        let id = NameId::from_raw(
            u32::try_from(self.names.len() + 1).expect("too many interned names"),
        );
        let name: Box<str> = name.into();
        self.index.insert(name.clone(), id);
        self.names.push(name);
        Ok(id)
    }

    /// Returns the id of `name` without interning it.
    pub fn get(&self, name: &str) -> Option<NameId> {
        if name.is_empty() {
            return Some(NameId::EMPTY);
        }
        self.index.get(name).copied()
    }

    /// Resolves an id handed out by [`NameTable::intern`].
    pub fn resolve(&self, id: NameId) -> &str {
        if id == NameId::EMPTY {
            return "";
        }
        match self.names.get(id.to_raw() as usize - 1) {
            Some(name) => name,
            None => panic!(
                "name id {} out of range ({} names)",
                id.to_raw(),
                self.names.len()
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.log.flush()?;
        self.log.get_ref().sync_data()?;
        Ok(())
    }
}

fn truncated_entry(err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::CorruptNames("log ends inside an entry".to_string())
    } else {
        StoreError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut names = NameTable::create(&dir.path().join("names.dat")).unwrap();
        let a = names.intern("a.txt").unwrap();
        let b = names.intern("b.txt").unwrap();
        assert_ne!(a, b);
        assert_eq!(names.intern("a.txt").unwrap(), a);
        assert_eq!(names.resolve(a), "a.txt");
        assert_eq!(names.intern("").unwrap(), NameId::EMPTY);
        assert_eq!(names.resolve(NameId::EMPTY), "");
    }

    #[test]
    fn ids_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.dat");

        let mut names = NameTable::create(&path).unwrap();
        let ids: Vec<_> = ["src", "Main.java", "日本語"]
            .iter()
            .map(|name| names.intern(name).unwrap())
            .collect();
        names.flush().unwrap();
        drop(names);

        let mut names = NameTable::open(&path).unwrap();
        assert_eq!(names.resolve(ids[0]), "src");
        assert_eq!(names.resolve(ids[1]), "Main.java");
        assert_eq!(names.resolve(ids[2]), "日本語");
        assert_eq!(names.intern("Main.java").unwrap(), ids[1]);
        let fresh = names.intern("lib").unwrap();
        assert_eq!(fresh.to_raw(), 4);
    }

    #[test]
    fn truncated_log_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.dat");

        let mut names = NameTable::create(&path).unwrap();
        names.intern("a-fairly-long-name").unwrap();
        names.flush().unwrap();
        drop(names);

        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let err = NameTable::open(&path).unwrap_err();
        assert!(err.requires_rebuild(), "unexpected error: {err:?}");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.dat");
        std::fs::write(&path, b"garbage!").unwrap();
        assert!(matches!(
            NameTable::open(&path),
            Err(StoreError::InvalidHeader { .. })
        ));
    }
}
