use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use ferry_core::manifest::SourceEntry;
use ferry_core::path_safety::{validate_artifact_name, validate_path, PathPolicy};
use ferry_core::source::{self, SourceFilter};

#[cfg(target_family = "unix")]
fn symlink_dir<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

fn entry(root: &Path, rel: &str) -> SourceEntry {
    SourceEntry { root: root.to_string_lossy().into_owned(), rel_path: rel.into(), size: 6 }
}

#[test]
fn rejects_absolute_and_parent_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let policy = PathPolicy::default();
    let err = validate_path(tmp.path(), Path::new("../outside.txt"), policy).unwrap_err();
    assert!(err.to_string().contains("parent traversal"), "{err}");
    let abs = tmp.path().join("x");
    let err = validate_path(tmp.path(), &abs, policy).unwrap_err();
    assert!(err.to_string().contains("absolute"), "{err}");
    assert!(validate_path(tmp.path(), Path::new("a/b.txt"), policy).is_ok());
}

#[test]
fn artifact_names_are_single_components() {
    assert!(validate_artifact_name("t0-00000001.chunk").is_ok());
    assert!(validate_artifact_name("a/b").is_err());
    assert!(validate_artifact_name("..").is_err());
    assert!(validate_artifact_name("").is_err());
    assert!(validate_artifact_name("/etc").is_err());
}

#[cfg(target_family = "unix")]
#[test]
fn resolve_rejects_symlink_by_default_allows_with_flag_when_contained() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("target")).unwrap();
    let mut f = File::create(root.join("target/file.txt")).unwrap();
    writeln!(f, "hello").unwrap();
    symlink_dir(root.join("target"), root.join("safe")).unwrap();

    let e = entry(&root, "safe/file.txt");
    let err = source::resolve(&e, PathPolicy::default()).expect_err("expected error");
    assert!(format!("{err:#}").contains("symlink"), "unexpected error: {err}");

    let policy = PathPolicy { follow_symlinks: true };
    let resolved = source::resolve(&e, policy).unwrap();
    assert_eq!(fs::read_to_string(resolved).unwrap(), "hello\n");
}

#[cfg(target_family = "unix")]
#[test]
fn resolve_blocks_symlink_escape_even_when_following() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(&root).unwrap();
    let parent = root.parent().unwrap();
    symlink_dir(parent, root.join("evil")).unwrap();
    let mut of = File::create(parent.join("outside.txt")).unwrap();
    writeln!(of, "outside").unwrap();

    let policy = PathPolicy { follow_symlinks: true };
    let err = source::resolve(&entry(&root, "evil/outside.txt"), policy)
        .expect_err("expected escape error");
    assert!(err.to_string().contains("escapes root"), "{err}");
}

#[cfg(target_family = "unix")]
#[test]
fn enumeration_skips_symlinks_unless_following() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("target")).unwrap();
    fs::write(root.join("target/file.txt"), b"hello\n").unwrap();
    symlink_dir(root.join("target"), root.join("safe")).unwrap();
    let inputs = vec![root.clone()];

    let plain = source::enumerate(&inputs, &SourceFilter::allow_all(), PathPolicy::default())
        .unwrap();
    let rels: Vec<&str> = plain.iter().map(|e| e.rel_path.as_str()).collect();
    assert_eq!(rels, vec!["target/file.txt"]);

    let followed = source::enumerate(
        &inputs,
        &SourceFilter::allow_all(),
        PathPolicy { follow_symlinks: true },
    )
    .unwrap();
    let rels: Vec<&str> = followed.iter().map(|e| e.rel_path.as_str()).collect();
    assert_eq!(rels, vec!["safe/file.txt", "target/file.txt"]);
}

#[test]
fn enumeration_is_sorted_filtered_and_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("data");
    for (rel, body) in [("z.bin", "zz"), ("a/b.bin", "b"), ("a/skip.tmp", "t"), ("m.bin", "")] {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }
    let single = tmp.path().join("single.txt");
    fs::write(&single, "solo").unwrap();

    let filter = SourceFilter::new(&[], &["**/*.tmp".to_string()]).unwrap();
    let inputs = vec![root.clone(), single.clone()];
    let first = source::enumerate(&inputs, &filter, PathPolicy::default()).unwrap();
    let got: Vec<(String, u64)> = first.iter().map(|e| (e.rel_path.clone(), e.size)).collect();
    assert_eq!(
        got,
        vec![
            ("single.txt".to_string(), 4),
            ("a/b.bin".to_string(), 1),
            ("m.bin".to_string(), 0),
            ("z.bin".to_string(), 2),
        ]
    );
    // Input order does not matter.
    let reversed = vec![single, root];
    assert_eq!(source::enumerate(&reversed, &filter, PathPolicy::default()).unwrap(), first);

    let only_z = SourceFilter::new(&["z.*".to_string()], &[]).unwrap();
    let z = source::enumerate(&inputs[..1], &only_z, PathPolicy::default()).unwrap();
    assert_eq!(z.len(), 1);
    assert_eq!(z[0].rel_path, "z.bin");
}

#[test]
fn enumeration_records_canonical_roots() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("data");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("sub/x.bin"), b"x").unwrap();
    fs::write(tmp.path().join("lone.txt"), b"lone").unwrap();

    let plain = vec![root.clone(), tmp.path().join("lone.txt")];
    let winding = vec![root.join("sub/.."), tmp.path().join("./data/../lone.txt")];
    let a = source::enumerate(&plain, &SourceFilter::allow_all(), PathPolicy::default()).unwrap();
    let b = source::enumerate(&winding, &SourceFilter::allow_all(), PathPolicy::default()).unwrap();
    assert_eq!(a, b);

    let canonical = fs::canonicalize(&root).unwrap();
    for e in &a {
        assert!(Path::new(&e.root).is_absolute(), "{}", e.root);
        assert!(!e.root.contains(".."), "{}", e.root);
    }
    assert!(a.iter().any(|e| Path::new(&e.root) == canonical && e.rel_path == "sub/x.bin"));
}
