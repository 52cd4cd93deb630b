//! The explicit handle to one transfer's persisted state.
//!
//! A transfer identity maps to exactly one manifest file, one lease file and
//! (in staged mode) one staging namespace. Everything that needs the state
//! between interactive steps reaches it through this handle; nothing is
//! cached process-wide.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::lease::Lease;
use crate::manifest::{Manifest, SourceEntry, TransferMode};
use crate::path_safety::{validate_artifact_name, PathPolicy};
use crate::source::{self, SourceFilter};
use crate::stage::Stager;
use crate::store::ManifestStore;

pub struct TransferContext {
    id: String,
    inputs: Vec<PathBuf>,
    mode: TransferMode,
    chunk_size: u64,
    store: ManifestStore,
    lease_path: PathBuf,
    stager: Option<Stager>,
    filter: SourceFilter,
    policy: PathPolicy,
}

impl TransferContext {
    pub fn open(config: &TransferConfig, inputs: Vec<PathBuf>) -> Result<Self> {
        config.validate()?;
        let id = match &config.transfer_id {
            Some(id) => {
                validate_artifact_name(id)?;
                id.clone()
            }
            None => transfer_id(config, &inputs)?,
        };
        let store = ManifestStore::new(config.state_dir.join(format!("{id}.manifest.json")))
            .with_ttl(config.state_ttl());
        let lease_path = config.state_dir.join(format!("{id}.lock"));
        let stager = match (config.mode, &config.staging_dir) {
            (TransferMode::Staged, Some(dir)) => Some(Stager::new(dir, &id)?),
            (TransferMode::Staged, None) => {
                return Err(TransferError::InvalidConfig("staged mode needs a staging_dir".into()))
            }
            (TransferMode::Direct, _) => None,
        };
        debug!(transfer = %id, manifest = %store.path().display(), "transfer context opened");
        Ok(Self {
            id,
            inputs,
            mode: config.mode,
            chunk_size: config.chunk_size,
            store,
            lease_path,
            stager,
            filter: SourceFilter::new(&config.include, &config.exclude)?,
            policy: PathPolicy { follow_symlinks: config.follow_symlinks },
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn policy(&self) -> PathPolicy {
        self.policy
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn stager(&self) -> Option<&Stager> {
        self.stager.as_ref()
    }

    pub fn lease_path(&self) -> &Path {
        &self.lease_path
    }

    /// Exclusive lease for one state transition.
    pub fn lease(&self) -> Result<Lease> {
        Lease::try_acquire(&self.lease_path, &self.id)
    }

    /// The manifest this transfer starts from, before anything is planned.
    pub fn initial_manifest(&self) -> Manifest {
        Manifest::new(
            self.id.clone(),
            self.mode,
            source::describe(&self.inputs),
            self.chunk_size,
        )
    }

    pub fn enumerate_sources(&self) -> Result<Vec<SourceEntry>> {
        source::enumerate(&self.inputs, &self.filter, self.policy)
    }

    /// Discards all persisted state of this transfer: manifest, staging
    /// artifacts and lease file.
    pub fn abort(&self) -> Result<()> {
        {
            let _lease = self.lease()?;
            self.store.delete()?;
            if let Some(stager) = &self.stager {
                stager.purge()?;
            }
        }
        match std::fs::remove_file(&self.lease_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(transfer = %self.id, "transfer state discarded");
        Ok(())
    }
}

/// Stable identity of a transfer: a digest over the canonical inputs and
/// every setting that changes the chunk plan or its destination.
pub fn transfer_id(config: &TransferConfig, inputs: &[PathBuf]) -> Result<String> {
    let mut paths = Vec::with_capacity(inputs.len());
    for p in inputs {
        paths.push(std::fs::canonicalize(p)?.to_string_lossy().into_owned());
    }
    paths.sort();
    let mut h = blake3::Hasher::new();
    h.update(b"ferry-transfer-v1\0");
    h.update(config.endpoint.as_bytes());
    h.update(&[0]);
    h.update(&config.chunk_size.to_le_bytes());
    h.update(match config.mode {
        TransferMode::Direct => b"direct",
        TransferMode::Staged => b"staged",
    });
    for p in &paths {
        h.update(&[0]);
        h.update(p.as_bytes());
    }
    for g in config.include.iter().chain(config.exclude.iter()) {
        h.update(&[1]);
        h.update(g.as_bytes());
    }
    let digest = h.finalize();
    Ok(digest.to_hex().as_str()[..32].to_string())
}
