use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use vesta_core::now_millis;

use crate::fs::{FileAttributes, FileSystem, VolumeId};
use crate::path::VfsPath;

#[derive(Debug, Clone)]
enum NodeKind {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    writable: bool,
    timestamp: i64,
}

#[derive(Debug)]
struct Inner {
    nodes: BTreeMap<VfsPath, Node>,
    volumes: BTreeMap<VfsPath, VolumeId>,
    clock: i64,
}

impl Inner {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn node(&self, path: &VfsPath) -> io::Result<&Node> {
        self.nodes.get(path).ok_or_else(|| not_found(path))
    }

    fn node_mut(&mut self, path: &VfsPath) -> io::Result<&mut Node> {
        self.nodes.get_mut(path).ok_or_else(|| not_found(path))
    }

    fn require_dir(&self, path: &VfsPath) -> io::Result<()> {
        match self.node(path)?.kind {
            NodeKind::Dir => Ok(()),
            NodeKind::File(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is not a directory"),
            )),
        }
    }

    fn require_absent(&self, path: &VfsPath) -> io::Result<()> {
        if self.nodes.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{path} already exists"),
            ));
        }
        Ok(())
    }

    /// Validates that `path` can be created: absent, with an existing parent directory.
    fn require_creatable(&self, path: &VfsPath) -> io::Result<VfsPath> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "the root always exists")
        })?;
        self.require_dir(&parent)?;
        self.require_absent(path)?;
        Ok(parent)
    }

    fn touch_dir(&mut self, dir: &VfsPath) {
        let now = self.tick();
        if let Some(node) = self.nodes.get_mut(dir) {
            node.timestamp = now;
        }
    }

    fn subtree(&self, path: &VfsPath) -> Vec<VfsPath> {
        self.nodes
            .keys()
            .filter(|candidate| candidate.starts_with(path))
            .cloned()
            .collect()
    }

    fn mkdirs(&mut self, path: &VfsPath) -> io::Result<()> {
        let mut current = VfsPath::root();
        for component in path.components() {
            current = current.join(component);
            match self.nodes.get(&current) {
                Some(Node {
                    kind: NodeKind::Dir,
                    ..
                }) => {}
                Some(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{current} is a file"),
                    ))
                }
                None => {
                    let timestamp = self.tick();
                    self.nodes.insert(
                        current.clone(),
                        Node {
                            kind: NodeKind::Dir,
                            writable: true,
                            timestamp,
                        },
                    );
                }
            }
        }
        Ok(())
    }
}

/// In-memory delegate filesystem.
///
/// Timestamps come from a logical clock that starts at the current wall-clock time in
/// milliseconds and advances by one on every mutation, so two writes to the same file always
/// produce different timestamps. Clones share the same tree, which lets a test
/// keep a handle for mutating the "disk" behind an overlay's back.
#[derive(Debug, Clone)]
pub struct MemoryFs {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let clock = now_millis();
        let mut nodes = BTreeMap::new();
        nodes.insert(
            VfsPath::root(),
            Node {
                kind: NodeKind::Dir,
                writable: true,
                timestamp: clock,
            },
        );
        Self {
            inner: Arc::new(Mutex::new(Inner {
                nodes,
                volumes: BTreeMap::new(),
                clock,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory fs mutex poisoned")
    }

    /// Creates `path` and any missing ancestors as directories.
    pub fn add_dir(&self, path: impl Into<VfsPath>) -> io::Result<()> {
        self.lock().mkdirs(&path.into())
    }

    /// Creates or replaces the file at `path`, creating missing ancestor directories.
    pub fn add_file(
        &self,
        path: impl Into<VfsPath>,
        contents: impl Into<Vec<u8>>,
    ) -> io::Result<()> {
        let path = path.into();
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot replace the root with a file")
        })?;
        let mut inner = self.lock();
        inner.mkdirs(&parent)?;
        if let Some(Node {
            kind: NodeKind::Dir,
            ..
        }) = inner.nodes.get(&path)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is a directory"),
            ));
        }
        let timestamp = inner.tick();
        inner.nodes.insert(
            path,
            Node {
                kind: NodeKind::File(contents.into()),
                writable: true,
                timestamp,
            },
        );
        inner.touch_dir(&parent);
        Ok(())
    }

    /// Advances the timestamp of `path` without changing its contents.
    pub fn touch(&self, path: impl Into<VfsPath>) -> io::Result<()> {
        let path = path.into();
        let mut inner = self.lock();
        let now = inner.tick();
        inner.node_mut(&path)?.timestamp = now;
        Ok(())
    }

    /// Places everything at or below `path` on a separate volume.
    pub fn mount_volume(&self, path: impl Into<VfsPath>, volume: VolumeId) {
        self.lock().volumes.insert(path.into(), volume);
    }
}

impl FileSystem for MemoryFs {
    fn list(&self, dir: &VfsPath) -> io::Result<Vec<String>> {
        let inner = self.lock();
        inner.require_dir(dir)?;
        Ok(inner
            .nodes
            .keys()
            .filter(|path| path.parent().as_ref() == Some(dir))
            .map(|path| path.file_name().to_owned())
            .collect())
    }

    fn attributes(&self, path: &VfsPath) -> io::Result<Option<FileAttributes>> {
        let inner = self.lock();
        Ok(inner.nodes.get(path).map(|node| FileAttributes {
            is_directory: matches!(node.kind, NodeKind::Dir),
            writable: node.writable,
            timestamp: node.timestamp,
            length: match &node.kind {
                NodeKind::Dir => 0,
                NodeKind::File(bytes) => bytes.len() as u64,
            },
        }))
    }

    fn read_bytes(&self, path: &VfsPath) -> io::Result<Vec<u8>> {
        let inner = self.lock();
        match &inner.node(path)?.kind {
            NodeKind::File(bytes) => Ok(bytes.clone()),
            NodeKind::Dir => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is a directory"),
            )),
        }
    }

    fn write_bytes(&self, path: &VfsPath, contents: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        if !inner.nodes.contains_key(path) {
            let parent = inner.require_creatable(path)?;
            let timestamp = inner.tick();
            inner.nodes.insert(
                path.clone(),
                Node {
                    kind: NodeKind::File(contents.to_vec()),
                    writable: true,
                    timestamp,
                },
            );
            inner.touch_dir(&parent);
            return Ok(());
        }

        let now = inner.tick();
        let node = inner.node_mut(path)?;
        if !node.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{path} is read-only"),
            ));
        }
        match &mut node.kind {
            NodeKind::File(bytes) => {
                *bytes = contents.to_vec();
                node.timestamp = now;
                Ok(())
            }
            NodeKind::Dir => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is a directory"),
            )),
        }
    }

    fn create_file(&self, path: &VfsPath) -> io::Result<()> {
        let mut inner = self.lock();
        let parent = inner.require_creatable(path)?;
        let timestamp = inner.tick();
        inner.nodes.insert(
            path.clone(),
            Node {
                kind: NodeKind::File(Vec::new()),
                writable: true,
                timestamp,
            },
        );
        inner.touch_dir(&parent);
        Ok(())
    }

    fn create_dir(&self, path: &VfsPath) -> io::Result<()> {
        let mut inner = self.lock();
        let parent = inner.require_creatable(path)?;
        let timestamp = inner.tick();
        inner.nodes.insert(
            path.clone(),
            Node {
                kind: NodeKind::Dir,
                writable: true,
                timestamp,
            },
        );
        inner.touch_dir(&parent);
        Ok(())
    }

    fn delete(&self, path: &VfsPath) -> io::Result<()> {
        let mut inner = self.lock();
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::PermissionDenied, "cannot delete the root")
        })?;
        inner.node(path)?;
        for victim in inner.subtree(path) {
            inner.nodes.remove(&victim);
        }
        inner.touch_dir(&parent);
        Ok(())
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        let mut inner = self.lock();
        let from_parent = from.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::PermissionDenied, "cannot move the root")
        })?;
        inner.node(from)?;
        if to.starts_with(from) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot move {from} into itself ({to})"),
            ));
        }
        let to_parent = inner.require_creatable(to)?;

        for old in inner.subtree(from) {
            let suffix = old.as_str()[from.as_str().len()..].trim_start_matches('/');
            let new = VfsPath::new(format!("{}/{suffix}", to.as_str()));
            if let Some(node) = inner.nodes.remove(&old) {
                inner.nodes.insert(new, node);
            }
        }
        inner.touch_dir(&from_parent);
        inner.touch_dir(&to_parent);
        Ok(())
    }

    fn copy(&self, from: &VfsPath, to: &VfsPath) -> io::Result<()> {
        let mut inner = self.lock();
        inner.node(from)?;
        if to.starts_with(from) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot copy {from} into itself ({to})"),
            ));
        }
        let to_parent = inner.require_creatable(to)?;

        for old in inner.subtree(from) {
            let suffix = old.as_str()[from.as_str().len()..].trim_start_matches('/');
            let new = VfsPath::new(format!("{}/{suffix}", to.as_str()));
            let timestamp = inner.tick();
            if let Some(node) = inner.nodes.get(&old).cloned() {
                inner.nodes.insert(
                    new,
                    Node {
                        timestamp,
                        writable: true,
                        ..node
                    },
                );
            }
        }
        inner.touch_dir(&to_parent);
        Ok(())
    }

    fn set_writable(&self, path: &VfsPath, writable: bool) -> io::Result<()> {
        self.lock().node_mut(path)?.writable = writable;
        Ok(())
    }

    fn volume(&self, path: &VfsPath) -> io::Result<VolumeId> {
        let inner = self.lock();
        inner.node(path)?;
        Ok(inner
            .volumes
            .iter()
            .filter(|(mount, _)| path.starts_with(mount))
            .max_by_key(|(mount, _)| mount.as_str().len())
            .map(|(_, volume)| *volume)
            .unwrap_or(VolumeId::DEFAULT))
    }
}

fn not_found(path: &VfsPath) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path} not found"))
}
