use std::sync::{Arc, Mutex};

use vesta_storage::RecordStore;
use vesta_vfs::{
    BulkFileListener, ChangeEvent, ChangeKind, ChannelListener, FileSystem, LocalFs, MemoryFs,
    OpenOutcome, PersistentVfs, RecordId, RefreshOptions, VfsError, VfsNotification, VfsPath,
    VolumeId,
};

fn overlay(fs: &MemoryFs) -> (tempfile::TempDir, PersistentVfs<MemoryFs>) {
    let tmp = tempfile::tempdir().unwrap();
    let store = RecordStore::open(tmp.path()).unwrap();
    (tmp, PersistentVfs::new(fs.clone(), store))
}

#[test]
fn delegate_rename_refreshes_as_delete_then_create() {
    let fs = MemoryFs::new();
    fs.add_file("a.txt", "T1").unwrap();
    let (_tmp, mut vfs) = overlay(&fs);

    assert_eq!(vfs.list(vfs.root()).unwrap(), vec!["a.txt"]);
    let a = vfs.find_child(vfs.root(), "a.txt").unwrap().unwrap();

    fs.rename(&VfsPath::new("a.txt"), &VfsPath::new("b.txt")).unwrap();
    let events = vfs.refresh(RefreshOptions::default()).unwrap();

    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        ChangeEvent::Deleted { entry, path } if *entry == a && path.as_str() == "a.txt"
    ));
    assert!(matches!(
        &events[1],
        ChangeEvent::Created { parent, name, .. } if *parent == RecordId::ROOT && name == "b.txt"
    ));
    assert_eq!(vfs.list(vfs.root()).unwrap(), vec!["b.txt"]);
}

#[test]
fn second_refresh_without_changes_is_empty() {
    let fs = MemoryFs::new();
    fs.add_file("src/A.java", "class A {}").unwrap();
    fs.add_file("src/util/B.java", "class B {}").unwrap();
    fs.add_file("README", "hi").unwrap();
    let (_tmp, mut vfs) = overlay(&fs);
    vfs.find_by_path(&VfsPath::new("src/util/B.java"))
        .unwrap()
        .unwrap();

    fs.add_file("src/util/C.java", "class C {}").unwrap();
    fs.write_bytes(&VfsPath::new("README"), b"hello").unwrap();
    fs.delete(&VfsPath::new("src/A.java")).unwrap();
    fs.add_dir("docs/guide").unwrap();

    let first = vfs.refresh(RefreshOptions::default()).unwrap();
    assert!(!first.is_empty());
    let second = vfs.refresh(RefreshOptions::default()).unwrap();
    assert!(second.is_empty(), "unexpected events: {second:?}");
}

#[test]
fn deleting_a_listed_directory_frees_both_records() {
    let fs = MemoryFs::new();
    fs.add_file("d/f.txt", "x").unwrap();
    let (_tmp, mut vfs) = overlay(&fs);

    assert_eq!(vfs.list(vfs.root()).unwrap(), vec!["d"]);
    let d = vfs.find_child(vfs.root(), "d").unwrap().unwrap();
    assert_eq!(vfs.list(d).unwrap(), vec!["f.txt"]);
    let f = vfs.find_child(d, "f.txt").unwrap().unwrap();
    let live_before = vfs.store().live_record_count();

    vfs.delete(d).unwrap();

    let free = vfs.store().free_list();
    assert!(free.contains(&d) && free.contains(&f));
    for id in &free {
        assert!(!vfs.store().is_live(*id));
    }
    assert_eq!(vfs.store().live_record_count(), live_before - 2);
    assert!(vfs.list(vfs.root()).unwrap().is_empty());

    // Freed ids come back on the next allocations.
    fs.add_file("e/g.txt", "y").unwrap();
    vfs.refresh(RefreshOptions::default()).unwrap();
    let e = vfs.find_child(vfs.root(), "e").unwrap().unwrap();
    let g = vfs.find_child(e, "g.txt").unwrap().unwrap();
    assert!(free.contains(&e) && free.contains(&g));
}

#[test]
fn delegate_failure_leaves_store_untouched() {
    let fs = MemoryFs::new();
    fs.add_file("a", "").unwrap();
    fs.add_file("b", "").unwrap();
    let (_tmp, mut vfs) = overlay(&fs);
    let a = vfs.find_by_path(&VfsPath::new("a")).unwrap().unwrap();
    let dir = vfs.find_by_path(&VfsPath::root()).unwrap().unwrap();

    // The delegate learned about "c" behind the overlay's back.
    fs.add_file("c", "").unwrap();
    let before = vfs.store().global_mod_count();

    let err = vfs.create_child(dir, "c", false).unwrap_err();
    assert!(matches!(err, VfsError::Delegate(_)), "unexpected error: {err:?}");
    let err = vfs.rename(a, "c").unwrap_err();
    assert!(matches!(err, VfsError::Delegate(_)), "unexpected error: {err:?}");
    assert_eq!(vfs.store().global_mod_count(), before);
    assert_eq!(vfs.name(a), "a");
}

#[test]
fn moves_across_volumes_are_unsupported() {
    let fs = MemoryFs::new();
    fs.add_file("home/f.txt", "x").unwrap();
    fs.add_dir("mnt/usb").unwrap();
    fs.add_dir("home/sub").unwrap();
    fs.mount_volume("mnt", VolumeId(7));
    let (_tmp, mut vfs) = overlay(&fs);

    let file = vfs.find_by_path(&VfsPath::new("home/f.txt")).unwrap().unwrap();
    let usb = vfs.find_by_path(&VfsPath::new("mnt/usb")).unwrap().unwrap();
    let sub = vfs.find_by_path(&VfsPath::new("home/sub")).unwrap().unwrap();
    vfs.list(sub).unwrap();

    let before = vfs.store().global_mod_count();
    assert!(matches!(
        vfs.move_to(file, usb),
        Err(VfsError::Unsupported(_))
    ));
    assert_eq!(vfs.store().global_mod_count(), before);
    assert!(fs.attributes(&VfsPath::new("home/f.txt")).unwrap().is_some());

    vfs.move_to(file, sub).unwrap();
    assert_eq!(vfs.path_of(file), VfsPath::new("home/sub/f.txt"));
    assert!(fs.attributes(&VfsPath::new("home/sub/f.txt")).unwrap().is_some());

    let home = vfs.find_by_path(&VfsPath::new("home")).unwrap().unwrap();
    assert!(matches!(
        vfs.move_to(home, sub),
        Err(VfsError::MoveIntoSelf { .. })
    ));
}

#[test]
fn move_into_unlisted_directory_drops_the_record() {
    let fs = MemoryFs::new();
    fs.add_file("f.txt", "x").unwrap();
    fs.add_dir("later").unwrap();
    let (_tmp, mut vfs) = overlay(&fs);
    let file = vfs.find_child(vfs.root(), "f.txt").unwrap().unwrap();
    let later = vfs.find_child(vfs.root(), "later").unwrap().unwrap();

    vfs.move_to(file, later).unwrap();
    assert!(!vfs.store().is_live(file));
    assert_eq!(vfs.list(later).unwrap(), vec!["f.txt"]);
}

#[test]
fn copy_records_the_new_subtree() {
    let fs = MemoryFs::new();
    fs.add_file("src/a.txt", "a").unwrap();
    let (_tmp, mut vfs) = overlay(&fs);
    let src = vfs.find_by_path(&VfsPath::new("src")).unwrap().unwrap();

    let copy = vfs.copy(src, vfs.root(), "src-copy").unwrap();
    assert!(vfs.is_directory(copy));
    assert_eq!(vfs.list(copy).unwrap(), vec!["a.txt"]);
    let copied = vfs.find_child(copy, "a.txt").unwrap().unwrap();
    assert_eq!(&*vfs.contents(copied).unwrap(), b"a");
}

#[derive(Clone)]
struct Snapshotting {
    seen: Arc<Mutex<Vec<(&'static str, bool)>>>,
    watched: RecordId,
}

impl BulkFileListener for Snapshotting {
    fn before(&mut self, store: &RecordStore, _events: &[ChangeEvent]) {
        let live = store.is_live(self.watched);
        self.seen.lock().unwrap().push(("before", live));
    }

    fn after(&mut self, store: &RecordStore, _events: &[ChangeEvent]) {
        let live = store.is_live(self.watched);
        self.seen.lock().unwrap().push(("after", live));
    }
}

#[test]
fn listeners_see_state_before_and_after_the_whole_batch() {
    let fs = MemoryFs::new();
    fs.add_file("a", "").unwrap();
    fs.add_file("b", "").unwrap();
    let (_tmp, mut vfs) = overlay(&fs);
    let a = vfs.find_child(vfs.root(), "a").unwrap().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    vfs.add_listener(Snapshotting {
        seen: seen.clone(),
        watched: a,
    });
    let (channel, rx) = ChannelListener::new();
    vfs.add_listener(channel);

    fs.delete(&VfsPath::new("a")).unwrap();
    fs.delete(&VfsPath::new("b")).unwrap();
    let events = vfs.refresh(RefreshOptions::default()).unwrap();
    assert_eq!(events.len(), 2);

    assert_eq!(*seen.lock().unwrap(), vec![("before", true), ("after", false)]);
    match rx.try_recv().unwrap() {
        VfsNotification::Before(batch) => assert_eq!(&*batch, &events[..]),
        other => panic!("expected a before notification, got {other:?}"),
    }
    match rx.try_recv().unwrap() {
        VfsNotification::After(batch) => {
            assert!(batch.iter().all(|event| event.kind() == ChangeKind::Deleted));
        }
        other => panic!("expected an after notification, got {other:?}"),
    }
    assert!(rx.try_recv().is_err());
}

#[test]
fn cached_tree_survives_clean_reopen() {
    let fs = MemoryFs::new();
    fs.add_file("src/Main.java", "class Main {}").unwrap();
    let tmp = tempfile::tempdir().unwrap();

    let (mut vfs, outcome) = PersistentVfs::open(fs.clone(), tmp.path()).unwrap();
    assert_eq!(outcome, OpenOutcome::Created);
    let file = vfs
        .find_by_path(&VfsPath::new("src/Main.java"))
        .unwrap()
        .unwrap();
    vfs.contents(file).unwrap();
    vfs.close().unwrap();

    let (mut vfs, outcome) = PersistentVfs::open(fs.clone(), tmp.path()).unwrap();
    assert_eq!(outcome, OpenOutcome::Opened);
    assert_eq!(vfs.store().length(file), Some(13));
    assert_eq!(
        vfs.find_by_path(&VfsPath::new("src/Main.java")).unwrap(),
        Some(file)
    );
    assert!(vfs.refresh(RefreshOptions::default()).unwrap().is_empty());
}

#[test]
fn crashed_store_is_rebuilt_from_the_delegate() {
    let fs = MemoryFs::new();
    fs.add_file("a", "").unwrap();
    let tmp = tempfile::tempdir().unwrap();

    let (mut vfs, _) = PersistentVfs::open(fs.clone(), tmp.path()).unwrap();
    vfs.list(vfs.root()).unwrap();
    vfs.flush().unwrap();
    drop(vfs);

    let (mut vfs, outcome) = PersistentVfs::open(fs.clone(), tmp.path()).unwrap();
    assert!(matches!(outcome, OpenOutcome::Rebuilt { .. }));
    assert!(!vfs.store().children_cached(RecordId::ROOT));
    assert_eq!(vfs.list(vfs.root()).unwrap(), vec!["a"]);
}

#[test]
fn local_fs_delegate_end_to_end() {
    let disk = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(disk.path().join("pkg")).unwrap();
    std::fs::write(disk.path().join("pkg/Lib.java"), "class Lib {}").unwrap();

    let store = RecordStore::open(store_dir.path()).unwrap();
    let mut vfs = PersistentVfs::new(LocalFs::new(disk.path()), store);

    let pkg = vfs.find_by_path(&VfsPath::new("pkg")).unwrap().unwrap();
    let lib = vfs.find_child(pkg, "Lib.java").unwrap().unwrap();
    assert_eq!(vfs.length(lib).unwrap(), 12);

    let created = vfs.create_child(pkg, "New.java", false).unwrap();
    vfs.set_contents(created, b"class New {}").unwrap();
    assert_eq!(
        std::fs::read(disk.path().join("pkg/New.java")).unwrap(),
        b"class New {}"
    );

    std::fs::remove_file(disk.path().join("pkg/Lib.java")).unwrap();
    let events = vfs.refresh(RefreshOptions::default()).unwrap();
    assert!(events
        .iter()
        .any(|event| matches!(event, ChangeEvent::Deleted { entry, .. } if *entry == lib)));
    assert_eq!(vfs.list(pkg).unwrap(), vec!["New.java"]);
    assert!(LocalFs::new(disk.path())
        .attributes(&VfsPath::new("pkg/New.java"))
        .unwrap()
        .is_some());
}
