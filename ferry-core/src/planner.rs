//! Chunk boundary computation.
//!
//! Chunks never span sources: each source is cut into `chunk_size` pieces
//! from offset 0, the last piece carrying the remainder. Empty sources yield
//! no chunks. The next chunk is a pure function of the source sizes and the
//! cursor, which is what makes resuming after a crash safe.

use crate::manifest::{Cursor, SourceEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkCoord {
    pub source_index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkCoord {
    /// Cursor position just past this chunk.
    pub fn end(&self) -> Cursor {
        Cursor { source_index: self.source_index, offset: self.offset + self.length }
    }
}

#[derive(Clone, Debug)]
pub struct ChunkPlanner {
    sizes: Vec<u64>,
    chunk_size: u64,
}

impl ChunkPlanner {
    /// `chunk_size` must be non-zero; configuration validation guarantees it.
    pub fn new(sources: &[SourceEntry], chunk_size: u64) -> Self {
        Self { sizes: sources.iter().map(|s| s.size).collect(), chunk_size: chunk_size.max(1) }
    }

    pub fn from_sizes(sizes: Vec<u64>, chunk_size: u64) -> Self {
        Self { sizes, chunk_size: chunk_size.max(1) }
    }

    /// The chunk starting at `cursor`, or `None` once every source is exhausted.
    pub fn next_chunk(&self, cursor: &Cursor) -> Option<ChunkCoord> {
        let mut idx = cursor.source_index;
        let mut offset = cursor.offset;
        while idx < self.sizes.len() {
            let size = self.sizes[idx];
            if offset < size {
                let length = (size - offset).min(self.chunk_size);
                return Some(ChunkCoord { source_index: idx, offset, length });
            }
            idx += 1;
            offset = 0;
        }
        None
    }

    pub fn is_exhausted(&self, cursor: &Cursor) -> bool {
        self.next_chunk(cursor).is_none()
    }

    /// Lazily yields every remaining chunk from `cursor` on.
    pub fn iter_from(&self, cursor: Cursor) -> Chunks<'_> {
        Chunks { planner: self, cursor }
    }

    /// Number of chunks in the whole plan.
    pub fn total_chunks(&self) -> u64 {
        self.sizes.iter().map(|s| s.div_ceil(self.chunk_size)).sum()
    }
}

pub struct Chunks<'a> {
    planner: &'a ChunkPlanner,
    cursor: Cursor,
}

impl Iterator for Chunks<'_> {
    type Item = ChunkCoord;

    fn next(&mut self) -> Option<ChunkCoord> {
        let c = self.planner.next_chunk(&self.cursor)?;
        self.cursor = c.end();
        Some(c)
    }
}
