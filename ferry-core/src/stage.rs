//! Staging artifacts for the staged transfer mode.
//!
//! Each planned chunk is copied to `<dir>/<namespace>-<chunk index>.chunk`
//! before it is sent. Names are derived from the chunk index alone, so a
//! chunk re-staged after a crash overwrites its own half-written artifact.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::content_hash;
use crate::error::{Result, TransferError};
use crate::manifest::PendingChunk;
use crate::path_safety::validate_artifact_name;

const ARTIFACT_EXT: &str = "chunk";

pub struct Stager {
    dir: PathBuf,
    namespace: String,
    matcher: GlobMatcher,
}

impl Stager {
    /// `dir` must be supplied by the caller; there is no default location.
    pub fn new(dir: impl Into<PathBuf>, namespace: &str) -> Result<Self> {
        validate_artifact_name(namespace)?;
        let pattern = format!("{}-*.{}", globset::escape(namespace), ARTIFACT_EXT);
        let matcher = Glob::new(&pattern)
            .map_err(|e| TransferError::InvalidConfig(e.to_string()))?
            .compile_matcher();
        Ok(Self { dir: dir.into(), namespace: namespace.to_string(), matcher })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_name(&self, chunk_index: u64) -> String {
        format!("{}-{:08}.{}", self.namespace, chunk_index, ARTIFACT_EXT)
    }

    /// Writes `data` as the artifact for `chunk_index` and returns its name.
    pub fn stage(&self, chunk_index: u64, data: &[u8]) -> Result<String> {
        fs::create_dir_all(&self.dir)?;
        let name = self.artifact_name(chunk_index);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(&name)).map_err(|e| e.error)?;
        debug!(artifact = %name, bytes = data.len(), "chunk staged");
        Ok(name)
    }

    /// Reads a staged chunk back and checks it against its recorded hash.
    pub fn load(&self, pending: &PendingChunk) -> Result<Vec<u8>> {
        validate_artifact_name(&pending.staging_name)?;
        let data = fs::read(self.dir.join(&pending.staging_name))?;
        if data.len() as u64 != pending.length || content_hash(&data) != pending.content_hash {
            return Err(TransferError::HashMismatch(pending.staging_name.clone()));
        }
        Ok(data)
    }

    /// Deletes one artifact; already-missing artifacts are fine.
    pub fn discard(&self, name: &str) -> Result<()> {
        validate_artifact_name(name)?;
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every artifact of this namespace currently on disk, sorted by name.
    pub fn list(&self) -> Result<Vec<String>> {
        let rd = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for ent in rd {
            let ent = ent?;
            let name = ent.file_name().to_string_lossy().into_owned();
            if self.matcher.is_match(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes every artifact of this namespace, returning how many went.
    pub fn purge(&self) -> Result<usize> {
        let names = self.list()?;
        for name in &names {
            if let Err(e) = self.discard(name) {
                warn!(artifact = %name, error = %e, "failed to remove staging artifact");
                return Err(e);
            }
        }
        if !names.is_empty() {
            debug!(dir = %self.dir.display(), removed = names.len(), "staging purged");
        }
        Ok(names.len())
    }
}
