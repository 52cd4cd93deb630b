use tracing::info;

use crate::error::{Result, TransferError};
use crate::manifest::{Manifest, Status};
use crate::progress::StepReport;
use crate::stage::Stager;
use crate::store::ManifestStore;

/// Closes out a fully acknowledged transfer.
pub struct Finalizer<'a> {
    store: &'a ManifestStore,
    stager: Option<&'a Stager>,
}

impl<'a> Finalizer<'a> {
    pub fn new(store: &'a ManifestStore, stager: Option<&'a Stager>) -> Self {
        Self { store, stager }
    }

    /// Fails with `IncompleteTransfer` while chunks are pending or the cursor
    /// is short of `total_size`. Otherwise removes staging artifacts, marks
    /// the manifest complete and deletes it.
    pub fn finalize(&self, manifest: Manifest) -> Result<StepReport> {
        let manifest = self.mark_complete(manifest)?;
        self.store.delete()?;
        info!(
            transfer = %manifest.id,
            chunks = manifest.last_transmitted_chunk_index,
            bytes = manifest.total_size,
            "transfer complete"
        );
        Ok(StepReport::new(
            100,
            format!(
                "done: {} chunk(s), {} bytes delivered",
                manifest.last_transmitted_chunk_index, manifest.total_size
            ),
            None,
        ))
    }

    /// Everything `finalize` does short of deleting the manifest. Returns the
    /// saved, `complete` manifest.
    pub fn mark_complete(&self, mut manifest: Manifest) -> Result<Manifest> {
        check_complete(&manifest)?;
        if let Some(stager) = self.stager {
            stager.purge()?;
        }
        manifest.status = Status::Complete;
        self.store.save(&mut manifest)?;
        Ok(manifest)
    }
}

pub fn check_complete(manifest: &Manifest) -> Result<()> {
    if !manifest.pending_chunks.is_empty() {
        return Err(TransferError::IncompleteTransfer(format!(
            "{} staged chunk(s) not yet acknowledged",
            manifest.pending_chunks.len()
        )));
    }
    let acked = manifest.acknowledged_bytes();
    if acked < manifest.total_size {
        return Err(TransferError::IncompleteTransfer(format!(
            "{} of {} bytes acknowledged",
            acked, manifest.total_size
        )));
    }
    Ok(())
}
