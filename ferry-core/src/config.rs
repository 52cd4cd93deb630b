use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};
use crate::manifest::TransferMode;
use crate::retry::{Backoff, RetryPolicy};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_mode() -> TransferMode {
    TransferMode::Direct
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".ferry")
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    pub endpoint: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Attempts per chunk before the run gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_mode")]
    pub mode: TransferMode,
    /// Where manifests and lease files live.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Required for staged mode.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub state_ttl_secs: Option<u64>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Overrides the identity derived from inputs and settings.
    #[serde(default)]
    pub transfer_id: Option<String>,
}

impl TransferConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::None,
            mode: TransferMode::Direct,
            state_dir: default_state_dir(),
            staging_dir: None,
            state_ttl_secs: None,
            include: Vec::new(),
            exclude: Vec::new(),
            follow_symlinks: false,
            timeout_secs: None,
            auth_token: None,
            transfer_id: None,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransferError::InvalidConfig(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(TransferError::InvalidConfig("endpoint is empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.max_retries == 0 {
            return Err(TransferError::InvalidConfig("max_retries must be at least 1".into()));
        }
        if self.mode == TransferMode::Staged && self.staging_dir.is_none() {
            return Err(TransferError::InvalidConfig("staged mode needs a staging_dir".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff.clone())
    }

    pub fn state_ttl(&self) -> Option<Duration> {
        self.state_ttl_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
