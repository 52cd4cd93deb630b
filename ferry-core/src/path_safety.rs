use crate::error::{Result, TransferError};
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

fn invalid(msg: String) -> TransferError {
    TransferError::InvalidPath(msg)
}

/// Ensure `rel` is safe relative to `root`: no absolute, no `..`, and
/// if `follow_symlinks` then canonicalized path must stay under root; otherwise
/// any symlink along the way is rejected.
pub fn validate_path(root: &Path, rel: &Path, policy: PathPolicy) -> Result<PathBuf> {
    if rel.is_absolute() {
        return Err(invalid(format!("absolute paths are not allowed: {:?}", rel)));
    }
    for comp in rel.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(invalid(format!("parent traversal not allowed: {:?}", rel)));
        }
    }
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur = cur.join(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(invalid(format!("symlink in path (not following): {:?}", cur)));
                }
            }
        }
        Ok(candidate)
    } else {
        let root_can = std::fs::canonicalize(root)?;
        let cand_can = std::fs::canonicalize(&candidate)?;
        if !cand_can.starts_with(&root_can) {
            return Err(invalid(format!("path escapes root: {:?}", rel)));
        }
        Ok(cand_can)
    }
}

/// Staging artifact names must be a single plain file name.
pub fn validate_artifact_name(name: &str) -> Result<()> {
    let mut comps = Path::new(name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid(format!("bad staging artifact name: {:?}", name))),
    }
}
