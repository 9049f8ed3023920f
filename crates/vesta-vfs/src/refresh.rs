use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;

use hashbrown::HashMap;
use vesta_config::RefreshConfig;
use vesta_core::{CancellationToken, RecordId};
use vesta_storage::{RecordFlags, RecordStore};

use crate::change::{ChangeEvent, PropertyChange};
use crate::error::{Result, VfsError};
use crate::fs::{FileAttributes, FileSystem};
use crate::path::VfsPath;
use crate::vfs::path_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Descend into cached subdirectories; otherwise only the starting directory and the files
    /// directly in it are compared.
    pub recursive: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self { recursive: true }
    }
}

impl From<&RefreshConfig> for RefreshOptions {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            recursive: config.recursive,
        }
    }
}

/// One reconciliation pass comparing cached records with the delegate filesystem.
///
/// The session only reads the store; it produces a flat batch of [`ChangeEvent`]s that the
/// caller applies as a whole. Within one directory, deletions come first, then creations, then
/// per-entry changes; deeper directories follow in queue order.
#[derive(Debug)]
pub struct RefreshSession {
    queue: VecDeque<RecordId>,
    options: RefreshOptions,
    cancel: Option<CancellationToken>,
    /// Delegate attributes already fetched while diffing the parent directory.
    probed: HashMap<RecordId, FileAttributes>,
    events: Vec<ChangeEvent>,
}

impl RefreshSession {
    pub fn new(start: RecordId, options: RefreshOptions) -> Self {
        Self {
            queue: VecDeque::from([start]),
            options,
            cancel: None,
            probed: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Checks `token` before every dequeue.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_done(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs the pass to completion and returns the batch.
    pub fn run<F: FileSystem>(
        mut self,
        fs: &F,
        store: &mut RecordStore,
    ) -> Result<Vec<ChangeEvent>> {
        while !self.is_done() {
            if self
                .cancel
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                tracing::debug!(
                    target: "vesta.refresh",
                    pending = self.queue.len(),
                    "refresh cancelled"
                );
                return Err(VfsError::Cancelled);
            }
            self.step(fs, store)?;
        }

        tracing::debug!(
            target: "vesta.refresh",
            events = self.events.len(),
            "refresh pass finished"
        );
        Ok(self.events)
    }

    /// Processes the next pending entry.
    pub fn step<F: FileSystem>(&mut self, fs: &F, store: &mut RecordStore) -> Result<()> {
        let Some(id) = self.queue.pop_front() else {
            return Ok(());
        };
        if !store.is_live(id) {
            return Ok(());
        }
        let path = path_of(store, id);
        if store.is_directory(id) {
            self.diff_directory(fs, store, id, &path)
        } else {
            self.compare_file(fs, store, id, path)
        }
    }

    fn diff_directory<F: FileSystem>(
        &mut self,
        fs: &F,
        store: &mut RecordStore,
        dir: RecordId,
        path: &VfsPath,
    ) -> Result<()> {
        if !store.children_cached(dir) {
            return Ok(());
        }

        let live: BTreeSet<String> = match fs.list(path) {
            Ok(names) => names.into_iter().collect(),
            Err(err) if err.kind() == io::ErrorKind::NotFound && dir != RecordId::ROOT => {
                self.events.push(ChangeEvent::Deleted {
                    entry: dir,
                    path: path.clone(),
                });
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let current: BTreeMap<String, RecordId> = store
            .children(dir)?
            .into_iter()
            .map(|child| (store.name_of(child).to_owned(), child))
            .collect();

        for (name, &child) in &current {
            if !live.contains(name) {
                self.events.push(ChangeEvent::Deleted {
                    entry: child,
                    path: path.join(name),
                });
            }
        }

        for name in live.iter().filter(|name| !current.contains_key(*name)) {
            let child_path = path.join(name);
            // Gone again already; the next pass will not see it either.
            if let Some(attributes) = fs.attributes(&child_path)? {
                self.events.push(ChangeEvent::Created {
                    parent: dir,
                    name: name.clone(),
                    path: child_path,
                    attributes,
                });
            }
        }

        for (name, &child) in current.iter().filter(|(name, _)| live.contains(*name)) {
            let child_path = path.join(name);
            let Some(attributes) = fs.attributes(&child_path)? else {
                self.events.push(ChangeEvent::Deleted {
                    entry: child,
                    path: child_path,
                });
                continue;
            };

            if attributes.is_directory != store.is_directory(child) {
                self.replace(dir, child, name, child_path, attributes);
            } else if !attributes.is_directory || self.options.recursive {
                if !attributes.is_directory {
                    self.probed.insert(child, attributes);
                }
                self.queue.push_back(child);
            }
        }
        Ok(())
    }

    fn compare_file<F: FileSystem>(
        &mut self,
        fs: &F,
        store: &RecordStore,
        file: RecordId,
        path: VfsPath,
    ) -> Result<()> {
        let attributes = match self.probed.remove(&file) {
            Some(attributes) => attributes,
            None => match fs.attributes(&path)? {
                Some(attributes) => attributes,
                None => {
                    self.events.push(ChangeEvent::Deleted { entry: file, path });
                    return Ok(());
                }
            },
        };

        if attributes.is_directory {
            let parent = store.parent(file);
            let name = store.name_of(file).to_owned();
            self.replace(parent, file, &name, path, attributes);
            return Ok(());
        }

        let old_timestamp = store.timestamp(file);
        if attributes.timestamp != old_timestamp {
            self.events.push(ChangeEvent::ContentChanged {
                entry: file,
                path: path.clone(),
                old_timestamp,
                new_timestamp: attributes.timestamp,
                new_length: Some(attributes.length),
            });
        }

        let writable = !store.flags(file).contains(RecordFlags::READ_ONLY);
        if attributes.writable != writable {
            self.events.push(ChangeEvent::PropertyChanged {
                entry: file,
                path,
                change: PropertyChange::Writable {
                    old: writable,
                    new: attributes.writable,
                },
            });
        }
        Ok(())
    }

    /// An entry changed between file and directory: delete it and create it afresh.
    fn replace(
        &mut self,
        parent: RecordId,
        entry: RecordId,
        name: &str,
        path: VfsPath,
        attributes: FileAttributes,
    ) {
        self.events.push(ChangeEvent::Deleted {
            entry,
            path: path.clone(),
        });
        self.events.push(ChangeEvent::Created {
            parent,
            name: name.to_owned(),
            path,
            attributes,
        });
    }
}
