use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Result, TransferError};

/// Exclusive advisory lock on a transfer, held for one state transition.
/// Released when dropped.
#[derive(Debug)]
pub struct Lease {
    file: File,
    path: PathBuf,
}

impl Lease {
    /// Takes the lease without blocking; `Busy` if another step holds it.
    pub fn try_acquire(path: &Path, transfer_id: &str) -> Result<Lease> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lease = %path.display(), "lease acquired");
                Ok(Lease { file, path: path.to_path_buf() })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(TransferError::Busy(transfer_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well; unlocking first keeps
        // the release prompt on platforms that defer close.
        let _ = self.file.unlock();
        debug!(lease = %self.path.display(), "lease released");
    }
}
