use std::fs;
use std::path::Path;

use ferry_core::content_hash;
use ferry_core::manifest::{PendingChunk, SourceEntry};
use ferry_core::path_safety::PathPolicy;
use ferry_core::reader::ChunkReader;
use ferry_core::stage::Stager;
use ferry_core::TransferError;

fn entry(root: &Path, name: &str, size: u64) -> SourceEntry {
    SourceEntry { root: root.to_string_lossy().into_owned(), rel_path: name.into(), size }
}

#[test]
fn short_read_at_end_of_source() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.bin"), b"0123456789").unwrap();
    let a = entry(td.path(), "a.bin", 10);
    let mut reader = ChunkReader::new(PathPolicy::default());

    let head = reader.read(0, &a, 0, 4).unwrap();
    assert_eq!(head.data, b"0123");
    assert!(!head.end_of_source);

    let tail = reader.read(0, &a, 8, 4).unwrap();
    assert_eq!(tail.data, b"89");
    assert!(tail.end_of_source);
}

#[test]
fn keeps_one_source_open_at_a_time() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.bin"), b"aaaa").unwrap();
    fs::write(td.path().join("b.bin"), b"bbbbbb").unwrap();
    let a = entry(td.path(), "a.bin", 4);
    let b = entry(td.path(), "b.bin", 6);
    let mut reader = ChunkReader::new(PathPolicy::default());
    assert_eq!(reader.open_source(), None);

    reader.read(0, &a, 0, 4).unwrap();
    assert_eq!(reader.open_source(), Some(0));
    let got = reader.read(1, &b, 2, 4).unwrap();
    assert_eq!(got.data, b"bbbb");
    assert_eq!(reader.open_source(), Some(1));

    reader.close();
    assert_eq!(reader.open_source(), None);
}

#[test]
fn errors_release_the_handle() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.bin"), b"aaaa").unwrap();
    let a = entry(td.path(), "a.bin", 4);
    let mut reader = ChunkReader::new(PathPolicy::default());
    reader.read(0, &a, 0, 2).unwrap();
    assert_eq!(reader.open_source(), Some(0));

    // Source 1 grew after planning.
    fs::write(td.path().join("b.bin"), b"bbbbbbbb").unwrap();
    let b = entry(td.path(), "b.bin", 6);
    let err = reader.read(1, &b, 0, 6).unwrap_err();
    assert!(err.to_string().contains("changed size"), "{err}");
    assert_eq!(reader.open_source(), None);

    let missing = entry(td.path(), "gone.bin", 1);
    assert!(matches!(reader.read(2, &missing, 0, 1), Err(TransferError::Io(_))));
    assert_eq!(reader.open_source(), None);
}

fn pending(stager: &Stager, idx: u64, data: &[u8]) -> PendingChunk {
    PendingChunk {
        chunk_index: idx,
        source_index: 0,
        source: "a.bin".into(),
        offset: 0,
        length: data.len() as u64,
        content_hash: content_hash(data),
        staging_name: stager.stage(idx, data).unwrap(),
    }
}

#[test]
fn staged_artifacts_round_trip_and_purge_by_namespace() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path().join("staging");
    let ours = Stager::new(&dir, "t0").unwrap();
    let theirs = Stager::new(&dir, "t1").unwrap();
    assert!(ours.list().unwrap().is_empty());

    let p1 = pending(&ours, 1, b"first chunk");
    let p2 = pending(&ours, 2, b"second");
    pending(&theirs, 1, b"someone else");
    assert_eq!(p1.staging_name, "t0-00000001.chunk");
    assert_eq!(ours.list().unwrap(), vec![p1.staging_name.clone(), p2.staging_name.clone()]);

    assert_eq!(ours.load(&p2).unwrap(), b"second");
    ours.discard(&p2.staging_name).unwrap();
    ours.discard(&p2.staging_name).unwrap();
    assert_eq!(ours.list().unwrap(), vec![p1.staging_name.clone()]);

    assert_eq!(ours.purge().unwrap(), 1);
    assert!(ours.list().unwrap().is_empty());
    assert_eq!(theirs.list().unwrap(), vec!["t1-00000001.chunk".to_string()]);
}

#[test]
fn tampered_artifact_is_a_hash_mismatch() {
    let td = tempfile::tempdir().unwrap();
    let stager = Stager::new(td.path(), "t0").unwrap();
    let p = pending(&stager, 7, b"payload!");
    fs::write(stager.dir().join(&p.staging_name), b"PAYLOAD!").unwrap();
    assert!(matches!(stager.load(&p), Err(TransferError::HashMismatch(name)) if name == p.staging_name));
}

#[test]
fn artifact_names_cannot_escape_the_staging_dir() {
    let td = tempfile::tempdir().unwrap();
    let stager = Stager::new(td.path().join("staging"), "t0").unwrap();
    assert!(matches!(stager.discard("../manifest.json"), Err(TransferError::InvalidPath(_))));
    assert!(Stager::new(td.path(), "../t0").is_err());
}
