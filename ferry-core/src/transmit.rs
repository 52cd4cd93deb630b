use tracing::{debug, warn};

use crate::error::{AttemptFailure, Result, TransferError, TransportError};
use crate::retry::{RetryStrategy, Sleeper, ThreadSleeper};

/// One chunk as handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingChunk<'a> {
    pub transfer_id: &'a str,
    /// 1-based sequence number of the chunk within the transfer.
    pub chunk_index: u64,
    pub source: &'a str,
    pub offset: u64,
    pub content_hash: &'a str,
    /// True for the final chunk of its source.
    pub end_of_source: bool,
    pub data: &'a [u8],
}

/// Delivers chunk bytes to a remote endpoint.
///
/// Implementations may keep a connection or session open between calls;
/// `close` is invoked exactly once when the owning [`Transmitter`] goes away.
pub trait Transport {
    /// Sends one chunk and returns the remote status code.
    fn post(&mut self, endpoint: &str, chunk: &OutgoingChunk<'_>) -> Result<u16, TransportError>;

    fn close(&mut self) {}
}

/// Successful delivery of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
    pub attempts: u32,
}

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Sends chunks through a transport under a retry strategy.
///
/// The transport lives exactly as long as the transmitter and is closed on
/// drop, whichever way the transfer ends.
pub struct Transmitter {
    transport: Box<dyn Transport>,
    endpoint: String,
    retry: Box<dyn RetryStrategy>,
    sleeper: Box<dyn Sleeper>,
}

impl Transmitter {
    pub fn new(
        transport: Box<dyn Transport>,
        endpoint: impl Into<String>,
        retry: Box<dyn RetryStrategy>,
    ) -> Self {
        Self { transport, endpoint: endpoint.into(), retry, sleeper: Box::new(ThreadSleeper) }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Attempts delivery up to the strategy's attempt budget. Each attempt
    /// resends the whole chunk.
    pub fn send(&mut self, chunk: &OutgoingChunk<'_>) -> Result<Ack> {
        let max = self.retry.max_attempts().max(1);
        let mut last = None;
        for attempt in 1..=max {
            let delay = self.retry.delay_before(attempt);
            if attempt > 1 {
                self.sleeper.sleep(delay);
            }
            let failure = match self.transport.post(&self.endpoint, chunk) {
                Ok(status) if is_success(status) => {
                    debug!(
                        transfer = chunk.transfer_id,
                        chunk = chunk.chunk_index,
                        attempt,
                        status,
                        "chunk acknowledged"
                    );
                    return Ok(Ack { status, attempts: attempt });
                }
                Ok(status) => AttemptFailure::Rejected(status),
                Err(e) => AttemptFailure::Transport(e),
            };
            warn!(
                transfer = chunk.transfer_id,
                chunk = chunk.chunk_index,
                attempt,
                max_attempts = max,
                error = %failure,
                "send attempt failed"
            );
            last = Some(failure);
        }
        Err(TransferError::RetryExhausted {
            chunk_index: chunk.chunk_index,
            attempts: max,
            last: last.unwrap_or(AttemptFailure::Transport(TransportError::Other(
                "no attempt made".into(),
            ))),
        })
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.transport.close();
    }
}
