use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use vesta_config::VestaConfig;
use vesta_core::{content_hash, CancellationToken, RecordId};
use vesta_storage::{OpenOutcome, RecordFlags, RecordStore};

use crate::change::{ChangeEvent, PropertyChange};
use crate::content_cache::ContentCache;
use crate::error::{Result, VfsError};
use crate::fs::{FileAttributes, FileSystem};
use crate::listener::BulkFileListener;
use crate::path::{is_valid_name, VfsPath};
use crate::refresh::{RefreshOptions, RefreshSession};

/// Persistent overlay over a delegate [`FileSystem`].
///
/// Entries are records in a [`RecordStore`]. Directories are populated from the delegate the
/// first time they are listed. Mutations go to the delegate first and are then applied to the
/// store as [`ChangeEvent`] batches, bracketed by listener notifications.
///
/// The overlay does no locking of its own; all mutators take `&mut self`.
pub struct PersistentVfs<F: FileSystem> {
    fs: F,
    store: RecordStore,
    contents: ContentCache,
    listeners: Vec<Box<dyn BulkFileListener>>,
}

impl<F: FileSystem> fmt::Debug for PersistentVfs<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentVfs")
            .field("store", &self.store.dir())
            .field("cached_bytes", &self.contents.total_bytes())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<F: FileSystem> PersistentVfs<F> {
    /// Default byte budget for cached file contents.
    pub const DEFAULT_CONTENT_BUDGET_BYTES: usize = 16 * 1024 * 1024;

    pub fn new(fs: F, store: RecordStore) -> Self {
        Self::with_content_budget(fs, store, Self::DEFAULT_CONTENT_BUDGET_BYTES)
    }

    pub fn with_content_budget(fs: F, store: RecordStore, max_bytes: usize) -> Self {
        Self {
            fs,
            store,
            contents: ContentCache::new(max_bytes),
            listeners: Vec::new(),
        }
    }

    /// Opens the store in `dir`, rebuilding it when it cannot be trusted.
    pub fn open(fs: F, dir: &Path) -> Result<(Self, OpenOutcome)> {
        let (store, outcome) = RecordStore::open_or_rebuild(dir)?;
        Ok((Self::new(fs, store), outcome))
    }

    /// Opens the store configured in `config.store`.
    pub fn open_with_config(fs: F, config: &VestaConfig) -> Result<(Self, OpenOutcome)> {
        let dir = &config.store.dir;
        let (store, outcome) = if config.store.rebuild_on_corruption {
            RecordStore::open_or_rebuild(dir)?
        } else {
            RecordStore::open_with_outcome(dir)?
        };
        Ok((
            Self::with_content_budget(fs, store, config.content.cache_max_bytes),
            outcome,
        ))
    }

    /// Flushes the store and marks it safely closed.
    pub fn close(self) -> Result<()> {
        self.store.close()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()?;
        Ok(())
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn delegate(&self) -> &F {
        &self.fs
    }

    pub fn root(&self) -> RecordId {
        RecordId::ROOT
    }

    pub fn add_listener(&mut self, listener: impl BulkFileListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // --- queries ---

    pub fn path_of(&self, id: RecordId) -> VfsPath {
        path_of(&self.store, id)
    }

    pub fn name(&self, id: RecordId) -> &str {
        self.store.name_of(id)
    }

    pub fn is_directory(&self, id: RecordId) -> bool {
        self.store.is_directory(id)
    }

    pub fn is_writable(&self, id: RecordId) -> bool {
        !self.store.flags(id).contains(RecordFlags::READ_ONLY)
    }

    pub fn timestamp(&self, id: RecordId) -> i64 {
        self.store.timestamp(id)
    }

    /// Names of the entries in `dir`, listing the delegate on first access.
    pub fn list(&mut self, dir: RecordId) -> Result<Vec<String>> {
        let children = self.children(dir)?;
        Ok(children
            .into_iter()
            .map(|child| self.store.name_of(child).to_owned())
            .collect())
    }

    /// Records of the entries in `dir`, listing the delegate on first access.
    pub fn children(&mut self, dir: RecordId) -> Result<Vec<RecordId>> {
        if !self.store.is_directory(dir) {
            return Err(VfsError::NotADirectory(self.path_of(dir)));
        }
        if self.store.children_cached(dir) {
            return Ok(self.store.children(dir)?);
        }

        let path = self.path_of(dir);
        let mut names = self.fs.list(&path)?;
        names.sort();
        let mut probed = Vec::with_capacity(names.len());
        for name in names {
            // Entries that vanish between listing and probing are left out.
            if let Some(attributes) = self.fs.attributes(&path.join(&name))? {
                probed.push((name, attributes));
            }
        }

        let mut children = Vec::with_capacity(probed.len());
        for (name, attributes) in &probed {
            children.push(self.new_record(dir, name, attributes)?);
        }
        self.store.set_children(dir, &children)?;
        let flags = self.store.flags(dir).with(RecordFlags::CHILDREN_CACHED, true);
        self.store.set_flags(dir, flags);

        tracing::trace!(
            target: "vesta.vfs",
            path = %path,
            children = children.len(),
            "cached directory listing"
        );
        Ok(children)
    }

    pub fn find_child(&mut self, dir: RecordId, name: &str) -> Result<Option<RecordId>> {
        self.children(dir)?;
        Ok(self.store.find_child(dir, name)?)
    }

    /// Resolves `path` from the root, listing directories along the way.
    pub fn find_by_path(&mut self, path: &VfsPath) -> Result<Option<RecordId>> {
        let mut current = RecordId::ROOT;
        for component in path.components() {
            if !self.store.is_directory(current) {
                return Ok(None);
            }
            match self.find_child(current, component)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Contents of a file. Length and content hash are recorded on first read.
    pub fn contents(&mut self, id: RecordId) -> Result<Arc<[u8]>> {
        if self.store.is_directory(id) {
            return Err(VfsError::IsADirectory(self.path_of(id)));
        }
        if let Some(bytes) = self.contents.get(id) {
            return Ok(bytes);
        }

        let path = self.path_of(id);
        let bytes: Arc<[u8]> = self.fs.read_bytes(&path)?.into();
        self.record_contents(id, &bytes);
        self.contents.insert(id, bytes.clone());
        Ok(bytes)
    }

    /// Length of a file, asking the delegate when it is not known yet.
    pub fn length(&mut self, id: RecordId) -> Result<u64> {
        if self.store.is_directory(id) {
            return Err(VfsError::IsADirectory(self.path_of(id)));
        }
        if let Some(length) = self.store.length(id) {
            return Ok(length);
        }

        let path = self.path_of(id);
        let attributes = self
            .fs
            .attributes(&path)?
            .ok_or(VfsError::NotFound(path))?;
        self.store.set_length(id, Some(attributes.length));
        Ok(attributes.length)
    }

    fn record_contents(&mut self, id: RecordId, bytes: &[u8]) {
        let length = bytes.len() as u64;
        if self.store.length(id) != Some(length) {
            self.store.set_length(id, Some(length));
        }
        let hash = content_hash(bytes);
        if self.store.content_hash(id) != hash {
            self.store.set_content_hash(id, hash);
        }
    }

    // --- mutations ---

    /// Creates a file or directory on the delegate, then records it.
    pub fn create_child(&mut self, parent: RecordId, name: &str, is_dir: bool) -> Result<RecordId> {
        check_name(name)?;
        if !self.store.is_directory(parent) {
            return Err(VfsError::NotADirectory(self.path_of(parent)));
        }
        let path = self.path_of(parent).join(name);
        if self.store.children_cached(parent) && self.store.find_child(parent, name)?.is_some() {
            return Err(VfsError::AlreadyExists(path));
        }

        if is_dir {
            self.fs.create_dir(&path)?;
        } else {
            self.fs.create_file(&path)?;
        }
        let attributes = self.probe(&path)?;

        self.apply_events(&[ChangeEvent::Created {
            parent,
            name: name.to_owned(),
            path: path.clone(),
            attributes,
        }])?;
        self.find_child(parent, name)?
            .ok_or(VfsError::NotFound(path))
    }

    /// Deletes an entry and its subtree on the delegate, then frees their records.
    pub fn delete(&mut self, id: RecordId) -> Result<()> {
        if id == RecordId::ROOT {
            return Err(VfsError::Unsupported("the root cannot be deleted".into()));
        }
        let path = self.path_of(id);
        self.fs.delete(&path)?;
        self.apply_events(&[ChangeEvent::Deleted { entry: id, path }])
    }

    pub fn rename(&mut self, id: RecordId, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        if id == RecordId::ROOT {
            return Err(VfsError::Unsupported("the root cannot be renamed".into()));
        }
        let old_name = self.store.name_of(id).to_owned();
        if old_name == new_name {
            return Ok(());
        }
        let parent = self.store.parent(id);
        let path = self.path_of(id);
        let target = self.path_of(parent).join(new_name);
        if self.store.find_child(parent, new_name)?.is_some() {
            return Err(VfsError::AlreadyExists(target));
        }

        self.fs.rename(&path, &target)?;
        self.apply_events(&[ChangeEvent::PropertyChanged {
            entry: id,
            path,
            change: PropertyChange::Name {
                old: old_name,
                new: new_name.to_owned(),
            },
        }])
    }

    /// Moves an entry under `new_parent`, keeping its name.
    ///
    /// Moves across delegate volumes fail with [`VfsError::Unsupported`].
    pub fn move_to(&mut self, id: RecordId, new_parent: RecordId) -> Result<()> {
        if id == RecordId::ROOT {
            return Err(VfsError::Unsupported("the root cannot be moved".into()));
        }
        if !self.store.is_directory(new_parent) {
            return Err(VfsError::NotADirectory(self.path_of(new_parent)));
        }
        let old_parent = self.store.parent(id);
        if old_parent == new_parent {
            return Ok(());
        }

        let from = self.path_of(id);
        let parent_path = self.path_of(new_parent);
        if parent_path.starts_with(&from) {
            return Err(VfsError::MoveIntoSelf {
                from,
                to: parent_path,
            });
        }
        let name = self.store.name_of(id).to_owned();
        let to = parent_path.join(&name);
        let source_volume = self.fs.volume(&from)?;
        let target_volume = self.fs.volume(&parent_path)?;
        if source_volume != target_volume {
            return Err(VfsError::Unsupported(format!(
                "cannot move {from} to {to}: different volumes"
            )));
        }
        if self.store.children_cached(new_parent)
            && self.store.find_child(new_parent, &name)?.is_some()
        {
            return Err(VfsError::AlreadyExists(to));
        }

        self.fs.rename(&from, &to)?;
        self.apply_events(&[ChangeEvent::Moved {
            entry: id,
            old_parent,
            new_parent,
            path: to,
        }])
    }

    /// Copies an entry (and its subtree) to `new_parent/name` on the delegate, then records the
    /// copy.
    pub fn copy(&mut self, id: RecordId, new_parent: RecordId, name: &str) -> Result<RecordId> {
        check_name(name)?;
        if !self.store.is_directory(new_parent) {
            return Err(VfsError::NotADirectory(self.path_of(new_parent)));
        }
        let from = self.path_of(id);
        let to = self.path_of(new_parent).join(name);
        if self.store.children_cached(new_parent)
            && self.store.find_child(new_parent, name)?.is_some()
        {
            return Err(VfsError::AlreadyExists(to));
        }

        self.fs.copy(&from, &to).map_err(|err| match err.kind() {
            io::ErrorKind::Unsupported => VfsError::Unsupported(err.to_string()),
            _ => VfsError::Delegate(err),
        })?;
        let attributes = self.probe(&to)?;

        self.apply_events(&[ChangeEvent::Copied {
            original: id,
            new_parent,
            name: name.to_owned(),
            path: to.clone(),
            attributes,
        }])?;
        self.find_child(new_parent, name)?.ok_or(VfsError::NotFound(to))
    }

    /// Replaces the contents of a file on the delegate, then records the new timestamp, length
    /// and hash.
    pub fn set_contents(&mut self, id: RecordId, bytes: &[u8]) -> Result<()> {
        if self.store.is_directory(id) {
            return Err(VfsError::IsADirectory(self.path_of(id)));
        }
        let path = self.path_of(id);
        self.fs.write_bytes(&path, bytes)?;
        let attributes = self.probe(&path)?;

        self.apply_events(&[ChangeEvent::ContentChanged {
            entry: id,
            path,
            old_timestamp: self.store.timestamp(id),
            new_timestamp: attributes.timestamp,
            new_length: Some(bytes.len() as u64),
        }])?;
        self.record_contents(id, bytes);
        self.contents.insert(id, Arc::from(bytes));
        Ok(())
    }

    pub fn set_writable(&mut self, id: RecordId, writable: bool) -> Result<()> {
        let old = self.is_writable(id);
        if old == writable {
            return Ok(());
        }
        let path = self.path_of(id);
        self.fs.set_writable(&path, writable)?;
        self.apply_events(&[ChangeEvent::PropertyChanged {
            entry: id,
            path,
            change: PropertyChange::Writable { old, new: writable },
        }])
    }

    fn probe(&self, path: &VfsPath) -> Result<FileAttributes> {
        self.fs
            .attributes(path)?
            .ok_or_else(|| VfsError::NotFound(path.clone()))
    }

    // --- events ---

    /// Applies a batch of events in order between the listeners' `before` and `after` calls.
    ///
    /// Events that no longer match the store (an entry already deleted, a child already
    /// present) are skipped, so re-applying a batch is harmless. Every event is attempted; the
    /// first failure is returned after `after` has run.
    pub fn apply_events(&mut self, events: &[ChangeEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        for listener in &mut self.listeners {
            listener.before(&self.store, events);
        }

        let mut first_error = None;
        for event in events {
            if let Err(err) = self.apply_event(event) {
                tracing::warn!(
                    target: "vesta.vfs",
                    path = %event.path(),
                    kind = ?event.kind(),
                    error = %err,
                    "failed to apply change event"
                );
                first_error.get_or_insert(err);
            }
        }

        for listener in &mut self.listeners {
            listener.after(&self.store, events);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply_event(&mut self, event: &ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::Created {
                parent,
                name,
                attributes,
                ..
            }
            | ChangeEvent::Copied {
                new_parent: parent,
                name,
                attributes,
                ..
            } => self.apply_created(*parent, name, attributes),
            ChangeEvent::Deleted { entry, .. } => {
                if !self.store.is_live(*entry) {
                    return Ok(());
                }
                if *entry == RecordId::ROOT {
                    return Err(VfsError::Unsupported("the root cannot be deleted".into()));
                }
                self.detach(*entry)?;
                self.drop_subtree(*entry)
            }
            ChangeEvent::ContentChanged {
                entry,
                new_timestamp,
                new_length,
                ..
            } => {
                if !self.store.is_live(*entry) {
                    return Ok(());
                }
                self.store.set_timestamp(*entry, *new_timestamp);
                self.store.set_length(*entry, *new_length);
                // Unknown until the new bytes are read.
                self.store.set_content_hash(*entry, 0);
                self.contents.remove(*entry);
                Ok(())
            }
            ChangeEvent::PropertyChanged { entry, change, .. } => {
                if !self.store.is_live(*entry) {
                    return Ok(());
                }
                match change {
                    PropertyChange::Name { new, .. } => {
                        let name = self.store.intern(new)?;
                        self.store.set_name(*entry, name);
                    }
                    PropertyChange::Writable { new, .. } => {
                        let flags = self.store.flags(*entry).with(RecordFlags::READ_ONLY, !new);
                        self.store.set_flags(*entry, flags);
                    }
                }
                Ok(())
            }
            ChangeEvent::Moved {
                entry, new_parent, ..
            } => {
                if !self.store.is_live(*entry) || self.store.parent(*entry) == *new_parent {
                    return Ok(());
                }
                self.detach(*entry)?;
                if self.store.is_live(*new_parent) && self.store.children_cached(*new_parent) {
                    self.store.set_parent(*entry, *new_parent);
                    let mut siblings = self.store.children(*new_parent)?;
                    siblings.push(*entry);
                    self.store.set_children(*new_parent, &siblings)?;
                    Ok(())
                } else {
                    // The destination will be listed from the delegate when first accessed.
                    self.drop_subtree(*entry)
                }
            }
        }
    }

    fn apply_created(
        &mut self,
        parent: RecordId,
        name: &str,
        attributes: &FileAttributes,
    ) -> Result<()> {
        if !self.store.is_live(parent)
            || !self.store.is_directory(parent)
            || !self.store.children_cached(parent)
        {
            // An uncached directory picks the entry up when it is listed.
            return Ok(());
        }
        let mut siblings = self.store.children(parent)?;
        if siblings.iter().any(|child| self.store.name_of(*child) == name) {
            return Ok(());
        }
        let id = self.new_record(parent, name, attributes)?;
        siblings.push(id);
        self.store.set_children(parent, &siblings)?;
        Ok(())
    }

    fn new_record(
        &mut self,
        parent: RecordId,
        name: &str,
        attributes: &FileAttributes,
    ) -> Result<RecordId> {
        let name = self.store.intern(name)?;
        let id = self.store.allocate()?;
        self.store.set_parent(id, parent);
        self.store.set_name(id, name);
        self.store.set_flags(
            id,
            RecordFlags::empty()
                .with(RecordFlags::DIRECTORY, attributes.is_directory)
                .with(RecordFlags::READ_ONLY, !attributes.writable),
        );
        self.store.set_timestamp(id, attributes.timestamp);
        Ok(id)
    }

    /// Removes `id` from its parent's children list.
    fn detach(&mut self, id: RecordId) -> Result<()> {
        let parent = self.store.parent(id);
        if parent.is_none() || !self.store.is_live(parent) {
            return Ok(());
        }
        let mut siblings = self.store.children(parent)?;
        siblings.retain(|child| *child != id);
        self.store.set_children(parent, &siblings)?;
        Ok(())
    }

    /// Frees `id` and everything below it, dropping their cached contents.
    fn drop_subtree(&mut self, id: RecordId) -> Result<()> {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            self.contents.remove(current);
            if self.store.is_directory(current) {
                pending.extend(self.store.children(current)?);
            }
        }
        self.store.delete_recursive(id)?;
        Ok(())
    }

    // --- refresh ---

    /// Reconciles the whole tree with the delegate and applies the resulting batch.
    pub fn refresh(&mut self, options: RefreshOptions) -> Result<Vec<ChangeEvent>> {
        let events = RefreshSession::new(RecordId::ROOT, options).run(&self.fs, &mut self.store)?;
        self.apply_events(&events)?;
        Ok(events)
    }

    /// Like [`PersistentVfs::refresh`], stopping with [`VfsError::Cancelled`] once `token` is
    /// cancelled. A cancelled pass applies nothing.
    pub fn refresh_with_cancel(
        &mut self,
        options: RefreshOptions,
        token: &CancellationToken,
    ) -> Result<Vec<ChangeEvent>> {
        let events = RefreshSession::new(RecordId::ROOT, options)
            .with_cancellation(token.clone())
            .run(&self.fs, &mut self.store)?;
        self.apply_events(&events)?;
        Ok(events)
    }
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(VfsError::InvalidName(name.to_owned()))
    }
}

/// Path of a record, built by walking its parent chain up to the root.
pub(crate) fn path_of(store: &RecordStore, id: RecordId) -> VfsPath {
    let mut names = Vec::new();
    let mut current = id;
    while current != RecordId::ROOT {
        assert!(!current.is_none(), "record {id} is not attached to the root");
        names.push(store.name_of(current));
        current = store.parent(current);
    }
    names
        .iter()
        .rev()
        .fold(VfsPath::root(), |path, name| path.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFs;

    fn overlay(fs: &MemoryFs) -> (tempfile::TempDir, PersistentVfs<MemoryFs>) {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(tmp.path()).unwrap();
        (tmp, PersistentVfs::new(fs.clone(), store))
    }

    #[test]
    fn list_populates_once() {
        let fs = MemoryFs::new();
        fs.add_file("b.txt", "b").unwrap();
        fs.add_file("a.txt", "a").unwrap();
        let (_tmp, mut vfs) = overlay(&fs);

        assert_eq!(vfs.list(vfs.root()).unwrap(), vec!["a.txt", "b.txt"]);
        let extent = vfs.store().live_record_count();

        // Cached listings are served from the store.
        fs.add_file("c.txt", "c").unwrap();
        assert_eq!(vfs.list(vfs.root()).unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(vfs.store().live_record_count(), extent);
    }

    #[test]
    fn lengths_are_computed_lazily() {
        let fs = MemoryFs::new();
        fs.add_file("f.txt", "hello").unwrap();
        let (_tmp, mut vfs) = overlay(&fs);

        let file = vfs.find_by_path(&VfsPath::new("f.txt")).unwrap().unwrap();
        assert_eq!(vfs.store().length(file), None);
        assert_eq!(vfs.store().content_hash(file), 0);

        assert_eq!(&*vfs.contents(file).unwrap(), b"hello");
        assert_eq!(vfs.store().length(file), Some(5));
        assert_eq!(vfs.store().content_hash(file), content_hash(b"hello"));
    }

    #[test]
    fn path_of_walks_to_root() {
        let fs = MemoryFs::new();
        fs.add_file("src/main/App.java", "").unwrap();
        let (_tmp, mut vfs) = overlay(&fs);

        let path = VfsPath::new("src/main/App.java");
        let file = vfs.find_by_path(&path).unwrap().unwrap();
        assert_eq!(vfs.path_of(file), path);
        assert_eq!(vfs.path_of(vfs.root()), VfsPath::root());
        assert!(vfs.find_by_path(&VfsPath::new("src/nope")).unwrap().is_none());
        assert!(vfs
            .find_by_path(&VfsPath::new("src/main/App.java/x"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn create_rename_and_delete_follow_the_delegate() {
        let fs = MemoryFs::new();
        let (_tmp, mut vfs) = overlay(&fs);
        let root = vfs.root();
        vfs.list(root).unwrap();

        let dir = vfs.create_child(root, "src", true).unwrap();
        let file = vfs.create_child(dir, "A.java", false).unwrap();
        assert!(vfs.is_directory(dir));
        assert_eq!(vfs.path_of(file), VfsPath::new("src/A.java"));
        assert!(fs.attributes(&VfsPath::new("src/A.java")).unwrap().is_some());

        vfs.rename(file, "B.java").unwrap();
        assert_eq!(vfs.name(file), "B.java");
        assert!(fs.attributes(&VfsPath::new("src/B.java")).unwrap().is_some());
        assert!(fs.attributes(&VfsPath::new("src/A.java")).unwrap().is_none());

        vfs.delete(dir).unwrap();
        assert!(!vfs.store().is_live(dir));
        assert!(!vfs.store().is_live(file));
        assert!(vfs.list(root).unwrap().is_empty());
        assert!(fs.list(&VfsPath::root()).unwrap().is_empty());
    }

    #[test]
    fn invalid_names_are_rejected_before_the_delegate() {
        let fs = MemoryFs::new();
        let (_tmp, mut vfs) = overlay(&fs);
        let root = vfs.root();
        assert!(matches!(
            vfs.create_child(root, "a/b", false),
            Err(VfsError::InvalidName(_))
        ));
        assert!(matches!(
            vfs.delete(root),
            Err(VfsError::Unsupported(_))
        ));
        assert!(fs.list(&VfsPath::root()).unwrap().is_empty());
    }

    #[test]
    fn set_contents_updates_record_and_cache() {
        let fs = MemoryFs::new();
        fs.add_file("f", "old").unwrap();
        let (_tmp, mut vfs) = overlay(&fs);
        let file = vfs.find_by_path(&VfsPath::new("f")).unwrap().unwrap();
        let before = vfs.timestamp(file);

        vfs.set_contents(file, b"brand new").unwrap();
        assert!(vfs.timestamp(file) > before);
        assert_eq!(vfs.length(file).unwrap(), 9);
        assert_eq!(&*vfs.contents(file).unwrap(), b"brand new");
        assert_eq!(fs.read_bytes(&VfsPath::new("f")).unwrap(), b"brand new");
    }

    #[test]
    fn external_change_resets_the_content_hash() {
        let fs = MemoryFs::new();
        fs.add_file("f", "old").unwrap();
        let (_tmp, mut vfs) = overlay(&fs);
        let file = vfs.find_by_path(&VfsPath::new("f")).unwrap().unwrap();
        vfs.contents(file).unwrap();
        assert_eq!(vfs.store().content_hash(file), content_hash(b"old"));

        fs.write_bytes(&VfsPath::new("f"), b"newer").unwrap();
        vfs.refresh(crate::RefreshOptions::default()).unwrap();
        assert_eq!(vfs.store().length(file), Some(5));
        assert_eq!(vfs.store().content_hash(file), 0);

        assert_eq!(&*vfs.contents(file).unwrap(), b"newer");
        assert_eq!(vfs.store().content_hash(file), content_hash(b"newer"));
    }

    #[test]
    fn writable_flag_round_trips() {
        let fs = MemoryFs::new();
        fs.add_file("f", "").unwrap();
        let (_tmp, mut vfs) = overlay(&fs);
        let file = vfs.find_by_path(&VfsPath::new("f")).unwrap().unwrap();

        assert!(vfs.is_writable(file));
        vfs.set_writable(file, false).unwrap();
        assert!(!vfs.is_writable(file));
        assert!(!fs.attributes(&VfsPath::new("f")).unwrap().unwrap().writable);
    }
}
