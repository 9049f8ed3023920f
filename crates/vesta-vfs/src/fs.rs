use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::path::VfsPath;

/// Metadata the overlay copies from a delegate filesystem into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    pub is_directory: bool,
    pub writable: bool,
    /// Modification time in milliseconds since the unix epoch (or any monotonic clock the
    /// delegate keeps).
    pub timestamp: i64,
    pub length: u64,
}

/// Identity of the volume (device, archive, mount) an entry lives on.
///
/// Moves between volumes are not supported by the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeId(pub u64);

impl VolumeId {
    pub const DEFAULT: VolumeId = VolumeId(0);
}

/// The external source of truth cached by the overlay.
///
/// Paths are relative to the delegate's root. Implementations may return
/// `ErrorKind::Unsupported` for optional operations.
pub trait FileSystem: Send + Sync {
    /// Names of the entries directly inside `dir`.
    fn list(&self, dir: &VfsPath) -> io::Result<Vec<String>>;

    /// Returns `Ok(None)` when nothing exists at `path`.
    fn attributes(&self, path: &VfsPath) -> io::Result<Option<FileAttributes>>;

    fn read_bytes(&self, path: &VfsPath) -> io::Result<Vec<u8>>;

    fn write_bytes(&self, path: &VfsPath, contents: &[u8]) -> io::Result<()>;

    /// Creates an empty file; fails if `path` already exists.
    fn create_file(&self, path: &VfsPath) -> io::Result<()>;

    /// Creates an empty directory; fails if `path` already exists.
    fn create_dir(&self, path: &VfsPath) -> io::Result<()>;

    /// Deletes a file, or a directory together with everything below it.
    fn delete(&self, path: &VfsPath) -> io::Result<()>;

    /// Renames or moves an entry within this filesystem.
    fn rename(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()>;

    /// Copies a file or a directory tree to `to`, which must not exist yet.
    fn copy(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("copy not supported ({from} -> {to})"),
        ))
    }

    fn set_writable(&self, path: &VfsPath, writable: bool) -> io::Result<()>;

    fn volume(&self, _path: &VfsPath) -> io::Result<VolumeId> {
        Ok(VolumeId::DEFAULT)
    }
}

impl<F: FileSystem + ?Sized> FileSystem for std::sync::Arc<F> {
    fn list(&self, dir: &VfsPath) -> io::Result<Vec<String>> {
        (**self).list(dir)
    }

    fn attributes(&self, path: &VfsPath) -> io::Result<Option<FileAttributes>> {
        (**self).attributes(path)
    }

    fn read_bytes(&self, path: &VfsPath) -> io::Result<Vec<u8>> {
        (**self).read_bytes(path)
    }

    fn write_bytes(&self, path: &VfsPath, contents: &[u8]) -> io::Result<()> {
        (**self).write_bytes(path, contents)
    }

    fn create_file(&self, path: &VfsPath) -> io::Result<()> {
        (**self).create_file(path)
    }

    fn create_dir(&self, path: &VfsPath) -> io::Result<()> {
        (**self).create_dir(path)
    }

    fn delete(&self, path: &VfsPath) -> io::Result<()> {
        (**self).delete(path)
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        (**self).rename(from, to)
    }

    fn copy(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        (**self).copy(from, to)
    }

    fn set_writable(&self, path: &VfsPath, writable: bool) -> io::Result<()> {
        (**self).set_writable(path, writable)
    }

    fn volume(&self, path: &VfsPath) -> io::Result<VolumeId> {
        (**self).volume(path)
    }
}

/// Local OS file system rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local(&self, path: &VfsPath) -> PathBuf {
        path.to_local(&self.root)
    }

    fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
        let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
        while let Some((src, dst)) = pending.pop() {
            let file_type = fs::symlink_metadata(&src)?.file_type();
            if file_type.is_dir() {
                fs::create_dir(&dst)?;
                for entry in fs::read_dir(&src)? {
                    let entry = entry?;
                    pending.push((entry.path(), dst.join(entry.file_name())));
                }
            } else {
                fs::copy(&src, &dst)?;
            }
        }
        Ok(())
    }
}

impl FileSystem for LocalFs {
    fn list(&self, dir: &VfsPath) -> io::Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.local(dir))? {
            let entry = entry?;
            match entry.file_name().into_string() {
                Ok(name) => out.push(name),
                Err(name) => {
                    tracing::debug!(
                        target: "vesta.vfs",
                        dir = %dir,
                        name = ?name,
                        "skipping entry with a non UTF-8 name"
                    );
                }
            }
        }
        Ok(out)
    }

    fn attributes(&self, path: &VfsPath) -> io::Result<Option<FileAttributes>> {
        let metadata = match fs::metadata(self.local(path)) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let timestamp = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Ok(Some(FileAttributes {
            is_directory: metadata.is_dir(),
            writable: !metadata.permissions().readonly(),
            timestamp,
            length: if metadata.is_dir() { 0 } else { metadata.len() },
        }))
    }

    fn read_bytes(&self, path: &VfsPath) -> io::Result<Vec<u8>> {
        fs::read(self.local(path))
    }

    fn write_bytes(&self, path: &VfsPath, contents: &[u8]) -> io::Result<()> {
        fs::write(self.local(path), contents)
    }

    fn create_file(&self, path: &VfsPath) -> io::Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.local(path))
            .map(drop)
    }

    fn create_dir(&self, path: &VfsPath) -> io::Result<()> {
        fs::create_dir(self.local(path))
    }

    fn delete(&self, path: &VfsPath) -> io::Result<()> {
        let local = self.local(path);
        if fs::symlink_metadata(&local)?.is_dir() {
            fs::remove_dir_all(local)
        } else {
            fs::remove_file(local)
        }
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        let to = self.local(to);
        if to.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        fs::rename(self.local(from), to)
    }

    fn copy(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        let to = self.local(to);
        if to.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        Self::copy_tree(&self.local(from), &to)
    }

    fn set_writable(&self, path: &VfsPath, writable: bool) -> io::Result<()> {
        let local = self.local(path);
        let mut permissions = fs::metadata(&local)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(!writable);
        fs::set_permissions(local, permissions)
    }

    #[cfg(unix)]
    fn volume(&self, path: &VfsPath) -> io::Result<VolumeId> {
        use std::os::unix::fs::MetadataExt;

        Ok(VolumeId(fs::metadata(self.local(path))?.dev()))
    }
}
