//! Source enumeration: turns the caller's inputs into the fixed, sorted list
//! of files a manifest tracks.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, TransferError};
use crate::manifest::{SourceDescriptor, SourceEntry};
use crate::path_safety::{validate_path, PathPolicy};

/// Include/exclude globs matched against paths relative to their input root.
pub struct SourceFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl SourceFilter {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self> {
        let mut incb = GlobSetBuilder::new();
        let mut excb = GlobSetBuilder::new();
        for g in includes {
            incb.add(glob(g)?);
        }
        for g in excludes {
            excb.add(glob(g)?);
        }
        let include = incb.build().map_err(|e| TransferError::InvalidConfig(e.to_string()))?;
        let exclude = excb.build().map_err(|e| TransferError::InvalidConfig(e.to_string()))?;
        Ok(Self { include, exclude })
    }

    pub fn allow_all() -> Self {
        Self { include: GlobSet::empty(), exclude: GlobSet::empty() }
    }

    fn accepts(&self, rel: &str) -> bool {
        (self.include.is_empty() || self.include.is_match(rel)) && !self.exclude.is_match(rel)
    }
}

fn glob(pattern: &str) -> Result<Glob> {
    Glob::new(pattern).map_err(|e| TransferError::InvalidConfig(format!("glob {pattern:?}: {e}")))
}

/// Describes the inputs the way they are recorded in the manifest.
pub fn describe(inputs: &[PathBuf]) -> SourceDescriptor {
    match inputs {
        [single] if single.is_file() => SourceDescriptor::Single(path_string(single)),
        _ => SourceDescriptor::Set(inputs.iter().map(|p| path_string(p)).collect()),
    }
}

/// Lists every regular file under `inputs`, sorted by root then relative path.
/// A file input contributes itself; directories are walked recursively and
/// filtered. The order never depends on directory traversal order.
///
/// Roots are recorded canonicalized, so a resume from another working
/// directory reads the same files.
pub fn enumerate(
    inputs: &[PathBuf],
    filter: &SourceFilter,
    policy: PathPolicy,
) -> Result<Vec<SourceEntry>> {
    let mut out = Vec::new();
    for input in inputs {
        let input = &fs::canonicalize(input)?;
        let md = fs::metadata(input)?;
        if md.is_file() {
            let root = input.parent().unwrap_or(Path::new("/"));
            let name = input
                .file_name()
                .ok_or_else(|| TransferError::InvalidPath(format!("{:?} has no file name", input)))?;
            out.push(SourceEntry {
                root: path_string(root),
                rel_path: name.to_string_lossy().into_owned(),
                size: md.len(),
            });
        } else if md.is_dir() {
            for ent in WalkDir::new(input).follow_links(policy.follow_symlinks).min_depth(1) {
                let ent = ent.map_err(|e| TransferError::Io(e.into()))?;
                if !ent.file_type().is_file() {
                    continue;
                }
                let rel = pathdiff::diff_paths(ent.path(), input)
                    .unwrap_or_else(|| ent.path().to_path_buf());
                let rel = rel.to_string_lossy().replace('\\', "/");
                if !filter.accepts(&rel) {
                    continue;
                }
                out.push(SourceEntry {
                    root: path_string(input),
                    rel_path: rel,
                    size: ent.metadata().map_err(|e| TransferError::Io(e.into()))?.len(),
                });
            }
        }
    }
    out.sort_by(|a, b| (&a.root, &a.rel_path).cmp(&(&b.root, &b.rel_path)));
    out.dedup_by(|a, b| a.root == b.root && a.rel_path == b.rel_path);
    debug!(files = out.len(), "sources enumerated");
    Ok(out)
}

/// Resolves a manifest entry back to a readable path.
pub fn resolve(entry: &SourceEntry, policy: PathPolicy) -> Result<PathBuf> {
    validate_path(Path::new(&entry.root), Path::new(&entry.rel_path), policy)
}

fn path_string(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}
