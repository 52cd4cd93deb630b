pub mod config;
pub mod context;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod finalize;
pub mod lease;
pub mod manifest;
pub mod path_safety;
pub mod planner;
pub mod progress;
pub mod reader;
pub mod retry;
pub mod source;
pub mod stage;
pub mod store;
pub mod transmit;

pub use error::{AttemptFailure, Result, TransferError, TransportError};

/// BLAKE3 hex digest used as a chunk's content hash.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
