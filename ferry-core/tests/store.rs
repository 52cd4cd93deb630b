use std::time::Duration;

use ferry_core::lease::Lease;
use ferry_core::manifest::{
    Cursor, Manifest, SourceDescriptor, SourceEntry, Stage, Status, TransferMode,
};
use ferry_core::store::ManifestStore;
use ferry_core::TransferError;

fn sample_manifest() -> Manifest {
    let mut m = Manifest::new(
        "t0".to_string(),
        TransferMode::Direct,
        SourceDescriptor::Single("data/big.bin".into()),
        8,
    );
    m.set_sources(vec![SourceEntry { root: "data".into(), rel_path: "big.bin".into(), size: 20 }]);
    m.stage = Stage::Sending;
    m
}

#[test]
fn load_missing_is_not_found() {
    let td = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(td.path().join("t0.manifest.json"));
    assert!(matches!(store.load(), Err(TransferError::ManifestNotFound(_))));
    assert!(!store.exists());
    store.delete().unwrap();
}

#[test]
fn create_never_overwrites_an_existing_manifest() {
    let td = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(td.path().join("state/t0.manifest.json"));

    let mut m = store.create(sample_manifest()).unwrap();
    assert_eq!(m.version, 1);
    m.cursor = Cursor { source_index: 0, offset: 8 };
    m.last_transmitted_chunk_index = 1;
    m.status = Status::InProgress;
    store.save(&mut m).unwrap();
    assert_eq!(m.version, 2);

    let again = store.create(sample_manifest()).unwrap();
    assert_eq!(again.cursor, Cursor { source_index: 0, offset: 8 });
    assert_eq!(again.status, Status::InProgress);
    assert_eq!(again.last_transmitted_chunk_index, 1);
    assert_eq!(again.version, 2);
}

#[test]
fn save_rejects_stale_writers() {
    let td = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(td.path().join("t0.manifest.json"));
    let mut first = store.create(sample_manifest()).unwrap();
    let mut second = first.clone();

    first.cursor.offset = 8;
    store.save(&mut first).unwrap();

    second.cursor.offset = 16;
    let err = store.save(&mut second).unwrap_err();
    match &err {
        TransferError::StaleManifest { expected, found, .. } => {
            assert_eq!(*expected, 1);
            assert_eq!(*found, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert_eq!(store.load().unwrap().cursor.offset, 8);
}

#[test]
fn save_leaves_no_temporary_files_behind() {
    let td = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(td.path().join("t0.manifest.json"));
    let mut m = store.create(sample_manifest()).unwrap();
    for off in [8, 16, 20] {
        m.cursor.offset = off;
        store.save(&mut m).unwrap();
    }
    let names: Vec<String> = std::fs::read_dir(td.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["t0.manifest.json".to_string()]);
    let on_disk = store.load().unwrap();
    assert_eq!(on_disk.cursor.offset, 20);
    assert_eq!(on_disk.version, 4);
}

#[test]
fn persisted_schema_uses_flat_cursor_fields() {
    let td = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(td.path().join("t0.manifest.json"));
    store.create(sample_manifest()).unwrap();
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
    assert_eq!(raw["source_descriptor"], "data/big.bin");
    assert_eq!(raw["current_source_index"], 0);
    assert_eq!(raw["current_offset"], 0);
    assert_eq!(raw["last_transmitted_chunk_index"], 0);
    assert_eq!(raw["status"], "pending");
    assert_eq!(raw["stage"], "sending");
    assert!(raw["pending_chunks"].as_array().unwrap().is_empty());
}

#[test]
fn unparsable_manifest_is_corrupt() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("t0.manifest.json");
    std::fs::write(&path, b"{\"id\": \"t0\", \"version\": ").unwrap();
    let store = ManifestStore::new(&path);
    let err = store.load().unwrap_err();
    assert!(matches!(err, TransferError::ManifestCorrupt { .. }), "{err}");
    assert!(!err.is_retryable());
    // create() must not paper over a corrupt record either.
    assert!(matches!(store.create(sample_manifest()), Err(TransferError::ManifestCorrupt { .. })));
}

#[test]
fn stale_state_expires() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("t0.manifest.json");
    let store = ManifestStore::new(&path);
    let mut m = store.create(sample_manifest()).unwrap();

    m.updated_utc = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    std::fs::write(&path, serde_json::to_vec_pretty(&m).unwrap()).unwrap();

    let short = ManifestStore::new(&path).with_ttl(Some(Duration::from_secs(60)));
    assert!(matches!(short.load(), Err(TransferError::StateExpired(id)) if id == "t0"));
    let long = ManifestStore::new(&path).with_ttl(Some(Duration::from_secs(3 * 3600)));
    assert_eq!(long.load().unwrap().id, "t0");
    assert!(store.load().is_ok());
}

#[test]
fn lease_is_exclusive_until_dropped() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("locks/t0.lock");
    let held = Lease::try_acquire(&path, "t0").unwrap();
    assert_eq!(held.path(), path.as_path());
    let err = Lease::try_acquire(&path, "t0").unwrap_err();
    assert!(matches!(err, TransferError::Busy(ref id) if id == "t0"), "{err}");
    assert!(err.is_retryable());
    drop(held);
    Lease::try_acquire(&path, "t0").unwrap();
}

#[test]
fn unplanned_manifest_has_nothing_left_to_send() {
    let m = Manifest::new("t".into(), TransferMode::Direct, SourceDescriptor::Set(vec![]), 8);
    assert_eq!(m.percent_complete(), 100);
}
