use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use vesta_storage::{
    OpenOutcome, RecordFlags, RecordId, RecordStore, StoreError, RECORDS_FILE, RECORDS_VERSION,
};

#[test]
fn clean_close_preserves_records_names_and_attributes() {
    let tmp = tempfile::tempdir().unwrap();

    let (mut store, outcome) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    assert_eq!(outcome, OpenOutcome::Created);
    let id = store.allocate().unwrap();
    store.set_parent(id, RecordId::ROOT);
    let name = store.intern("Main.java").unwrap();
    store.set_name(id, name);
    store.set_flags(id, RecordFlags::READ_ONLY);
    store.set_timestamp(id, 1_700_000_000_000);
    store.set_content_hash(id, 0xdead_beef);
    store.set_children(RecordId::ROOT, &[id]).unwrap();
    let key = store.attribute_id("encoding").unwrap();
    store.write_attribute_bytes(id, key, b"UTF-8").unwrap();
    let counter = store.global_mod_count();
    store.close().unwrap();

    let (mut store, outcome) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    assert_eq!(outcome, OpenOutcome::Opened);
    assert_eq!(store.children(RecordId::ROOT).unwrap(), vec![id]);
    assert_eq!(store.name_of(id), "Main.java");
    assert_eq!(store.resolve(name), "Main.java");
    assert!(store.flags(id).contains(RecordFlags::READ_ONLY));
    assert_eq!(store.timestamp(id), 1_700_000_000_000);
    assert_eq!(store.content_hash(id), 0xdead_beef);
    assert_eq!(store.global_mod_count(), counter);
    let key = store.attribute_id("encoding").unwrap();
    assert_eq!(
        store.read_attribute(id, key).unwrap().as_deref(),
        Some(&b"UTF-8"[..])
    );
}

#[test]
fn unclean_shutdown_forces_rebuild() {
    let tmp = tempfile::tempdir().unwrap();

    let mut store = RecordStore::open(tmp.path()).unwrap();
    let id = store.allocate().unwrap();
    store.set_parent(id, RecordId::ROOT);
    store.flush().unwrap();
    // Simulated crash: no close.
    drop(store);

    let err = RecordStore::open(tmp.path()).unwrap_err();
    assert!(matches!(err, StoreError::UncleanShutdown { .. }), "{err:?}");
    assert!(err.requires_rebuild());

    let (store, outcome) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    assert!(matches!(outcome, OpenOutcome::Rebuilt { .. }));
    assert!(!store.is_live(id));
    assert_eq!(store.live_record_count(), 1);
    store.close().unwrap();

    let (_store, outcome) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    assert_eq!(outcome, OpenOutcome::Opened);
}

#[test]
fn version_mismatch_forces_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    RecordStore::open(tmp.path()).unwrap().close().unwrap();

    let mut file = OpenOptions::new()
        .write(true)
        .open(tmp.path().join(RECORDS_FILE))
        .unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&(RECORDS_VERSION + 1).to_le_bytes()).unwrap();
    drop(file);

    let err = RecordStore::open(tmp.path()).unwrap_err();
    assert!(matches!(err, StoreError::WrongVersion { .. }), "{err:?}");

    let (_store, outcome) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    assert!(matches!(outcome, OpenOutcome::Rebuilt { .. }));
}

#[test]
fn truncated_records_file_forces_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    RecordStore::open(tmp.path()).unwrap().close().unwrap();

    let file = OpenOptions::new()
        .write(true)
        .open(tmp.path().join(RECORDS_FILE))
        .unwrap();
    file.set_len(10).unwrap();
    drop(file);

    let err = RecordStore::open(tmp.path()).unwrap_err();
    assert!(matches!(err, StoreError::Truncated { .. }), "{err:?}");
    let (_store, outcome) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    assert!(matches!(outcome, OpenOutcome::Rebuilt { .. }));
}

#[test]
fn missing_companion_file_forces_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    RecordStore::open(tmp.path()).unwrap().close().unwrap();
    std::fs::remove_file(tmp.path().join(vesta_storage::NAMES_FILE)).unwrap();

    let err = RecordStore::open(tmp.path()).unwrap_err();
    assert!(matches!(err, StoreError::MissingFile(_)), "{err:?}");
    let (_store, outcome) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    assert!(matches!(outcome, OpenOutcome::Rebuilt { .. }));
}
