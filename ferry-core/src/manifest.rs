use serde::{Deserialize, Serialize};

/// What the caller asked to transfer: one file, or an ordered set of inputs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum SourceDescriptor {
    Single(String),
    Set(Vec<String>),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Complete,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Single pass: chunks are read straight from the sources and sent.
    Direct,
    /// Chunks are first materialized into a staging directory, then drained.
    Staged,
}

/// Engine states. Only `Planning` through `Finalizing` are ever persisted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Planning,
    Staging,
    Sending,
    Finalizing,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Planning => "planning",
            Stage::Staging => "staging",
            Stage::Sending => "sending",
            Stage::Finalizing => "finalizing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Some(match s {
            "init" => Stage::Init,
            "planning" => Stage::Planning,
            "staging" => Stage::Staging,
            "sending" => Stage::Sending,
            "finalizing" => Stage::Finalizing,
            "done" => Stage::Done,
            "failed" => Stage::Failed,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next byte position to process: a source index and an offset inside that source.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    #[serde(rename = "current_source_index")]
    pub source_index: usize,
    #[serde(rename = "current_offset")]
    pub offset: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SourceEntry {
    pub root: String,
    pub rel_path: String,
    pub size: u64,
}

/// A staged chunk waiting for acknowledgement.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PendingChunk {
    pub chunk_index: u64,
    pub source_index: usize,
    pub source: String,
    pub offset: u64,
    pub length: u64,
    pub content_hash: String,
    pub staging_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Manifest {
    pub id: String,
    pub version: u64,
    pub created_utc: String,
    pub updated_utc: String,
    pub mode: TransferMode,
    pub stage: Stage,
    pub source_descriptor: SourceDescriptor,
    pub sources: Vec<SourceEntry>,
    pub chunk_size: u64,
    pub total_size: u64,
    #[serde(flatten)]
    pub cursor: Cursor,
    #[serde(default)]
    pub staging_cursor: Cursor,
    pub last_transmitted_chunk_index: u64,
    #[serde(default)]
    pub pending_chunks: Vec<PendingChunk>,
    pub status: Status,
}

impl Manifest {
    pub fn new(
        id: String,
        mode: TransferMode,
        source_descriptor: SourceDescriptor,
        chunk_size: u64,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Manifest {
            id,
            version: 0,
            created_utc: now.clone(),
            updated_utc: now,
            mode,
            stage: Stage::Planning,
            source_descriptor,
            sources: Vec::new(),
            chunk_size,
            total_size: 0,
            cursor: Cursor::default(),
            staging_cursor: Cursor::default(),
            last_transmitted_chunk_index: 0,
            pending_chunks: Vec::new(),
            status: Status::Pending,
        }
    }

    /// Records the enumerated sources and fixes `total_size`.
    pub fn set_sources(&mut self, sources: Vec<SourceEntry>) {
        self.total_size = sources.iter().map(|s| s.size).sum();
        self.sources = sources;
    }

    /// Absolute byte position of a cursor across all sources.
    pub fn position(&self, cursor: &Cursor) -> u64 {
        let before: u64 = self.sources.iter().take(cursor.source_index).map(|s| s.size).sum();
        before + cursor.offset
    }

    /// Bytes acknowledged by the remote so far.
    pub fn acknowledged_bytes(&self) -> u64 {
        self.position(&self.cursor)
    }

    pub fn percent_complete(&self) -> u8 {
        crate::progress::percent(self.acknowledged_bytes(), self.total_size)
    }
}
