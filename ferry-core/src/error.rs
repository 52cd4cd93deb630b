use std::path::PathBuf;

/// Errors a transport reports for a single send attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("attempt timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Why one send attempt did not count as delivered.
#[derive(Debug, thiserror::Error)]
pub enum AttemptFailure {
    #[error("remote rejected chunk with status {0}")]
    Rejected(u16),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors produced by the transfer core.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no manifest at {0}")]
    ManifestNotFound(PathBuf),

    #[error("manifest {path} is corrupt: {reason}")]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("manifest {path} changed underneath us (expected version {expected}, found {found})")]
    StaleManifest {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("transfer {0} is locked by another step")]
    Busy(String),

    #[error("transfer state {0} expired")]
    StateExpired(String),

    #[error("chunk {chunk_index} failed after {attempts} attempt(s): {last}")]
    RetryExhausted {
        chunk_index: u64,
        attempts: u32,
        #[source]
        last: AttemptFailure,
    },

    #[error("transfer incomplete: {0}")]
    IncompleteTransfer(String),

    #[error("staging artifact {0} does not match its recorded hash")]
    HashMismatch(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("step request not authorized")]
    Unauthorized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransferError {
    /// Whether re-running the same step (or the whole run) can succeed
    /// without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Io(_)
                | TransferError::RetryExhausted { .. }
                | TransferError::StaleManifest { .. }
                | TransferError::Busy(_)
                | TransferError::IncompleteTransfer(_)
        )
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
