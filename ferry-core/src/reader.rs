use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{Result, TransferError};
use crate::manifest::SourceEntry;
use crate::path_safety::PathPolicy;
use crate::source;

/// Bytes read for one planned chunk.
#[derive(Debug, Clone)]
pub struct ChunkBytes {
    pub data: Vec<u8>,
    /// The read reached the end of the source.
    pub end_of_source: bool,
}

/// Reads chunk bytes from sources, keeping at most one source open.
///
/// The handle is opened lazily on the first read of a source and reused while
/// consecutive reads stay on it. Any failed read drops the handle.
pub struct ChunkReader {
    policy: PathPolicy,
    open: Option<(usize, File)>,
}

impl ChunkReader {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy, open: None }
    }

    /// Reads `length` bytes at `offset`, or fewer if the source ends first.
    pub fn read(
        &mut self,
        index: usize,
        entry: &SourceEntry,
        offset: u64,
        length: u64,
    ) -> Result<ChunkBytes> {
        let res = self.read_inner(index, entry, offset, length);
        if res.is_err() {
            self.open = None;
        }
        res
    }

    fn read_inner(
        &mut self,
        index: usize,
        entry: &SourceEntry,
        offset: u64,
        length: u64,
    ) -> Result<ChunkBytes> {
        let file = self.handle(index, entry)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; length as usize];
        let mut filled = 0usize;
        while filled < data.len() {
            match file.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        data.truncate(filled);
        let end_of_source = offset + filled as u64 >= entry.size;
        Ok(ChunkBytes { data, end_of_source })
    }

    fn handle(&mut self, index: usize, entry: &SourceEntry) -> Result<&mut File> {
        // Taking the previous handle out releases it before the next one opens.
        let file = match self.open.take() {
            Some((i, f)) if i == index => f,
            _ => {
                let path = source::resolve(entry, self.policy)?;
                let file = File::open(&path)?;
                let actual = file.metadata()?.len();
                if actual != entry.size {
                    return Err(TransferError::Io(std::io::Error::new(
                        ErrorKind::InvalidData,
                        format!(
                            "source {} changed size since planning ({} -> {} bytes)",
                            path.display(),
                            entry.size,
                            actual
                        ),
                    )));
                }
                file
            }
        };
        let (_, f) = self.open.insert((index, file));
        Ok(f)
    }

    /// Index of the source currently held open, if any.
    pub fn open_source(&self) -> Option<usize> {
        self.open.as_ref().map(|(i, _)| *i)
    }

    pub fn close(&mut self) {
        self.open = None;
    }
}
