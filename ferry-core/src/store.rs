//! Durable manifest persistence.
//!
//! Every write goes to a temporary file in the manifest's directory, is
//! fsync'd, and then renamed over the previous manifest, so a crash leaves
//! either the old or the new record on disk, never a torn one. Saves are
//! compare-and-swap on `Manifest::version`.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, TransferError};
use crate::manifest::Manifest;

pub struct ManifestStore {
    path: PathBuf,
    ttl: Option<Duration>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ttl: None }
    }

    /// Manifests not written for longer than `ttl` are refused on load.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Manifest> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransferError::ManifestNotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| TransferError::ManifestCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if let Some(ttl) = self.ttl {
            self.check_expiry(&manifest, ttl)?;
        }
        Ok(manifest)
    }

    /// Persists `initial` unless a manifest already exists, in which case the
    /// existing one is returned untouched.
    pub fn create(&self, mut initial: Manifest) -> Result<Manifest> {
        if self.exists() {
            return self.load();
        }
        initial.version = 1;
        let tmp = self.write_temp(&initial)?;
        match tmp.persist_noclobber(&self.path) {
            Ok(_) => {
                sync_parent(&self.path)?;
                debug!(path = %self.path.display(), id = %initial.id, "manifest created");
                Ok(initial)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => self.load(),
            Err(e) => Err(e.error.into()),
        }
    }

    /// Atomically replaces the stored manifest. Fails with `StaleManifest`
    /// when the stored version is not the one `manifest` was loaded at; on
    /// success `manifest.version` is bumped to the new stored version.
    pub fn save(&self, manifest: &mut Manifest) -> Result<()> {
        let found = match self.load_unchecked() {
            Ok(current) => current.version,
            Err(TransferError::ManifestNotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        if found != manifest.version {
            return Err(TransferError::StaleManifest {
                path: self.path.clone(),
                expected: manifest.version,
                found,
            });
        }

        let mut next = manifest.clone();
        next.version = manifest.version + 1;
        next.updated_utc = chrono::Utc::now().to_rfc3339();
        let tmp = self.write_temp(&next)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        sync_parent(&self.path)?;
        debug!(path = %self.path.display(), version = next.version, "manifest saved");
        *manifest = next;
        Ok(())
    }

    /// Removes the manifest; a missing manifest is not an error.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "manifest deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_unchecked(&self) -> Result<Manifest> {
        Self { path: self.path.clone(), ttl: None }.load()
    }

    fn check_expiry(&self, manifest: &Manifest, ttl: Duration) -> Result<()> {
        let updated = chrono::DateTime::parse_from_rfc3339(&manifest.updated_utc).map_err(|e| {
            TransferError::ManifestCorrupt {
                path: self.path.clone(),
                reason: format!("bad updated_utc: {e}"),
            }
        })?;
        let age = chrono::Utc::now().signed_duration_since(updated);
        let expired = match age.to_std() {
            Ok(age) => age > ttl,
            // Timestamp in the future: treat as fresh.
            Err(_) => false,
        };
        if expired {
            return Err(TransferError::StateExpired(manifest.id.clone()));
        }
        Ok(())
    }

    fn write_temp(&self, manifest: &Manifest) -> Result<NamedTempFile> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        let json = serde_json::to_vec_pretty(manifest).map_err(std::io::Error::from)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}
