//! The transfer state machine.
//!
//! `INIT -> [PLANNING -> STAGING ->] SENDING -> FINALIZING -> DONE`, with
//! `FAILED` entered when a chunk exhausts its retry budget. The current
//! stage is persisted in the manifest, so `step` can be driven one call at a
//! time by independent processes, and `run` is nothing more than `step` in a
//! loop. Every transition holds the transfer's lease and saves with a
//! version check; the manifest only moves forward after a positive
//! acknowledgement.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::TransferConfig;
use crate::content_hash;
use crate::context::TransferContext;
use crate::error::{Result, TransferError};
use crate::finalize::Finalizer;
use crate::manifest::{Cursor, Manifest, PendingChunk, SourceEntry, Stage, Status, TransferMode};
use crate::planner::{ChunkCoord, ChunkPlanner};
use crate::progress::{Progress, StepReport};
use crate::reader::{ChunkBytes, ChunkReader};
use crate::retry::Sleeper;
use crate::transmit::{OutgoingChunk, Transmitter, Transport};

pub struct TransferEngine {
    ctx: TransferContext,
    transmitter: Transmitter,
    reader: ChunkReader,
    stage: Stage,
}

impl TransferEngine {
    pub fn new(ctx: TransferContext, transmitter: Transmitter) -> Self {
        let reader = ChunkReader::new(ctx.policy());
        Self { ctx, transmitter, reader, stage: Stage::Init }
    }

    /// Builds the context and a transmitter using the config's retry policy.
    pub fn open(
        config: &TransferConfig,
        inputs: Vec<PathBuf>,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let ctx = TransferContext::open(config, inputs)?;
        let transmitter = Transmitter::new(
            transport,
            config.endpoint.clone(),
            Box::new(config.retry_policy()),
        );
        Ok(Self::new(ctx, transmitter))
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.transmitter = self.transmitter.with_sleeper(sleeper);
        self
    }

    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Stage this engine last moved to (`Init` before the first step).
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stage recorded on disk; `Init` when no manifest exists.
    pub fn persisted_stage(&self) -> Result<Stage> {
        Ok(self.manifest()?.map_or(Stage::Init, |m| m.stage))
    }

    pub fn manifest(&self) -> Result<Option<Manifest>> {
        match self.ctx.store().load() {
            Ok(m) => Ok(Some(m)),
            Err(TransferError::ManifestNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Executes exactly one state transition under the transfer's lease.
    pub fn step(&mut self) -> Result<StepReport> {
        let lease = self.ctx.lease()?;
        let res = self.transition();
        drop(lease);
        match &res {
            Ok(report) => self.stage = report.next_step.unwrap_or(Stage::Done),
            Err(e @ TransferError::RetryExhausted { .. }) => {
                error!(transfer = %self.ctx.id(), error = %e, "transfer halted; resumable from the same chunk");
                self.stage = Stage::Failed;
            }
            Err(_) => {}
        }
        if matches!(self.stage, Stage::Done | Stage::Failed) {
            self.reader.close();
        }
        res
    }

    /// Steps until the transfer is done or a step fails.
    pub fn run(&mut self) -> Result<StepReport> {
        let mut progress = Progress::new(Duration::from_secs(5));
        loop {
            let report = self.step()?;
            progress.observe(self.stage, &report);
            if report.is_terminal() {
                return Ok(report);
            }
        }
    }

    fn transition(&mut self) -> Result<StepReport> {
        let manifest = match self.ctx.store().load() {
            Ok(m) => m,
            Err(TransferError::ManifestNotFound(_)) => return self.init(),
            Err(e) => return Err(e),
        };
        match manifest.stage {
            Stage::Planning => self.plan(manifest),
            Stage::Staging => self.stage_next(manifest),
            Stage::Sending => self.send_next(manifest),
            Stage::Finalizing => self.finalize(manifest),
            other => Err(TransferError::ManifestCorrupt {
                path: self.ctx.store().path().to_path_buf(),
                reason: format!("stage {other} is never persisted"),
            }),
        }
    }

    fn init(&mut self) -> Result<StepReport> {
        let mut m = self.ctx.initial_manifest();
        match self.ctx.mode() {
            TransferMode::Direct => {
                m.set_sources(self.ctx.enumerate_sources()?);
                m.stage = Stage::Sending;
            }
            TransferMode::Staged => m.stage = Stage::Planning,
        }
        let m = self.ctx.store().create(m)?;
        info!(transfer = %m.id, mode = ?m.mode, next = %m.stage, "transfer initialised");
        Ok(report(&m, format!("transfer {} initialised", m.id)))
    }

    fn plan(&mut self, mut m: Manifest) -> Result<StepReport> {
        m.set_sources(self.ctx.enumerate_sources()?);
        m.cursor = Cursor::default();
        m.staging_cursor = Cursor::default();
        m.pending_chunks.clear();
        if let Some(stager) = self.ctx.stager() {
            stager.purge()?;
        }
        m.stage = match m.mode {
            TransferMode::Staged => Stage::Staging,
            TransferMode::Direct => Stage::Sending,
        };
        m.status = Status::InProgress;
        self.ctx.store().save(&mut m)?;
        let chunks = ChunkPlanner::new(&m.sources, m.chunk_size).total_chunks();
        info!(
            transfer = %m.id,
            files = m.sources.len(),
            bytes = m.total_size,
            chunks,
            "transfer planned"
        );
        Ok(report(
            &m,
            format!("planned {} file(s), {} bytes, {} chunk(s)", m.sources.len(), m.total_size, chunks),
        ))
    }

    fn stage_next(&mut self, mut m: Manifest) -> Result<StepReport> {
        let planner = ChunkPlanner::new(&m.sources, m.chunk_size);
        let Some(coord) = planner.next_chunk(&m.staging_cursor) else {
            m.stage = Stage::Sending;
            self.ctx.store().save(&mut m)?;
            info!(transfer = %m.id, staged = m.pending_chunks.len(), "staging complete");
            return Ok(report(&m, format!("{} chunk(s) staged", m.pending_chunks.len())));
        };
        let stager = self.ctx.stager().ok_or_else(|| {
            TransferError::InvalidConfig("staged transfer without a staging_dir".into())
        })?;

        let entry = source_entry(&self.ctx, &m, coord.source_index)?.clone();
        let bytes = read_exact(&mut self.reader, &entry, &coord)?;
        let chunk_index = m.last_transmitted_chunk_index + m.pending_chunks.len() as u64 + 1;
        let staging_name = stager.stage(chunk_index, &bytes.data)?;
        m.pending_chunks.push(PendingChunk {
            chunk_index,
            source_index: coord.source_index,
            source: entry.rel_path.clone(),
            offset: coord.offset,
            length: coord.length,
            content_hash: content_hash(&bytes.data),
            staging_name,
        });
        m.staging_cursor = coord.end();
        self.ctx.store().save(&mut m)?;

        let total = planner.total_chunks();
        Ok(report(&m, format!("staged chunk {chunk_index}/{total} ({})", entry.rel_path)))
    }

    fn send_next(&mut self, m: Manifest) -> Result<StepReport> {
        match m.mode {
            TransferMode::Staged => self.send_staged(m),
            TransferMode::Direct => self.send_direct(m),
        }
    }

    fn send_direct(&mut self, mut m: Manifest) -> Result<StepReport> {
        let planner = ChunkPlanner::new(&m.sources, m.chunk_size);
        let Some(coord) = planner.next_chunk(&m.cursor) else {
            return self.enter_finalizing(m);
        };
        let entry = source_entry(&self.ctx, &m, coord.source_index)?.clone();
        let bytes = read_exact(&mut self.reader, &entry, &coord)?;
        let chunk_index = m.last_transmitted_chunk_index + 1;
        let hash = content_hash(&bytes.data);
        let ack = self.transmitter.send(&OutgoingChunk {
            transfer_id: &m.id,
            chunk_index,
            source: &entry.rel_path,
            offset: coord.offset,
            content_hash: &hash,
            end_of_source: bytes.end_of_source,
            data: &bytes.data,
        })?;

        m.cursor = coord.end();
        m.last_transmitted_chunk_index = chunk_index;
        m.status = Status::InProgress;
        self.ctx.store().save(&mut m)?;
        info!(
            transfer = %m.id,
            chunk = chunk_index,
            source = %entry.rel_path,
            offset = coord.offset,
            bytes = coord.length,
            attempts = ack.attempts,
            "chunk delivered"
        );
        Ok(report(&m, format!("sent chunk {chunk_index}/{}", planner.total_chunks())))
    }

    fn send_staged(&mut self, mut m: Manifest) -> Result<StepReport> {
        let Some(head) = m.pending_chunks.first().cloned() else {
            return self.enter_finalizing(m);
        };
        let stager = self.ctx.stager().ok_or_else(|| {
            TransferError::InvalidConfig("staged transfer without a staging_dir".into())
        })?;
        let source_size = source_entry(&self.ctx, &m, head.source_index)?.size;
        let data = stager.load(&head)?;
        let ack = self.transmitter.send(&OutgoingChunk {
            transfer_id: &m.id,
            chunk_index: head.chunk_index,
            source: &head.source,
            offset: head.offset,
            content_hash: &head.content_hash,
            end_of_source: head.offset + head.length >= source_size,
            data: &data,
        })?;

        m.pending_chunks.remove(0);
        m.cursor = Cursor { source_index: head.source_index, offset: head.offset + head.length };
        m.last_transmitted_chunk_index = head.chunk_index;
        m.status = Status::InProgress;
        self.ctx.store().save(&mut m)?;
        // Only after the save. A leftover artifact is purged by the finalizer.
        if let Err(e) = stager.discard(&head.staging_name) {
            warn!(artifact = %head.staging_name, error = %e, "could not remove delivered artifact");
        }
        info!(
            transfer = %m.id,
            chunk = head.chunk_index,
            source = %head.source,
            offset = head.offset,
            bytes = head.length,
            attempts = ack.attempts,
            "staged chunk delivered"
        );
        Ok(report(
            &m,
            format!("sent chunk {} ({} still staged)", head.chunk_index, m.pending_chunks.len()),
        ))
    }

    fn enter_finalizing(&mut self, mut m: Manifest) -> Result<StepReport> {
        m.stage = Stage::Finalizing;
        self.ctx.store().save(&mut m)?;
        info!(transfer = %m.id, chunks = m.last_transmitted_chunk_index, "all chunks acknowledged");
        Ok(report(&m, "all chunks acknowledged"))
    }

    fn finalize(&mut self, m: Manifest) -> Result<StepReport> {
        let finalizer = Finalizer::new(self.ctx.store(), self.ctx.stager());
        match finalizer.finalize(m.clone()) {
            Err(TransferError::IncompleteTransfer(why)) => {
                let mut m = m;
                m.stage = resume_stage(&m);
                self.ctx.store().save(&mut m)?;
                info!(transfer = %m.id, reason = %why, next = %m.stage, "finalize refused; resuming");
                Ok(report(&m, format!("incomplete ({why}); returning to {}", m.stage)))
            }
            other => other,
        }
    }
}

fn report(m: &Manifest, message: impl Into<String>) -> StepReport {
    StepReport::new(m.percent_complete(), message, Some(m.stage))
}

/// Where unfinished work continues from.
fn resume_stage(m: &Manifest) -> Stage {
    match m.mode {
        TransferMode::Staged
            if m.pending_chunks.is_empty()
                && !ChunkPlanner::new(&m.sources, m.chunk_size).is_exhausted(&m.staging_cursor) =>
        {
            Stage::Staging
        }
        _ => Stage::Sending,
    }
}

fn source_entry<'m>(ctx: &TransferContext, m: &'m Manifest, idx: usize) -> Result<&'m SourceEntry> {
    m.sources.get(idx).ok_or_else(|| TransferError::ManifestCorrupt {
        path: ctx.store().path().to_path_buf(),
        reason: format!("cursor points at source {idx} of {}", m.sources.len()),
    })
}

/// Reads a planned chunk; a short read means the source shrank under us.
fn read_exact(reader: &mut ChunkReader, entry: &SourceEntry, c: &ChunkCoord) -> Result<ChunkBytes> {
    let bytes = reader.read(c.source_index, entry, c.offset, c.length)?;
    if bytes.data.len() as u64 != c.length {
        reader.close();
        return Err(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "{}: expected {} bytes at offset {}, read {}",
                entry.rel_path,
                c.length,
                c.offset,
                bytes.data.len()
            ),
        )));
    }
    Ok(bytes)
}
