use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use ferry_core::path_safety::{validate_path, PathPolicy};
use ferry_core::transmit::{OutgoingChunk, Transport};
use ferry_core::TransportError;

/// Picks a transport from the endpoint scheme.
pub fn for_endpoint(endpoint: &str, timeout: Option<Duration>) -> Result<Box<dyn Transport>> {
    if let Some(dir) = endpoint.strip_prefix("file://") {
        return Ok(Box::new(DirTransport::new(dir)));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(Box::new(HttpTransport::new(timeout)?));
    }
    bail!("unsupported endpoint {endpoint:?} (expected http://, https:// or file://)")
}

/// POSTs each chunk as an octet stream. One client (and its connection
/// pool) serves the whole transfer.
pub struct HttpTransport {
    client: Option<Client>,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self { client: Some(builder.build().context("build HTTP client")?) })
    }
}

impl Transport for HttpTransport {
    fn post(&mut self, endpoint: &str, chunk: &OutgoingChunk<'_>) -> Result<u16, TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::Closed)?;
        let resp = client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("X-Ferry-Transfer", chunk.transfer_id)
            .header("X-Ferry-Chunk", chunk.chunk_index.to_string())
            .header("X-Ferry-Source", header_safe(chunk.source))
            .header("X-Ferry-Offset", chunk.offset.to_string())
            .header("X-Ferry-Hash", chunk.content_hash)
            .header("X-Ferry-Final", if chunk.end_of_source { "1" } else { "0" })
            .body(chunk.data.to_vec())
            .send()
            .map_err(classify)?;
        Ok(resp.status().as_u16())
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            debug!("HTTP client released");
        }
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

/// Percent-encodes anything that is not printable ASCII.
fn header_safe(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if (0x21..0x7f).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Writes every chunk at its offset into `<root>/<source path>`, rebuilding
/// the sources on the local filesystem.
pub struct DirTransport {
    root: PathBuf,
}

impl DirTransport {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
}

impl Transport for DirTransport {
    fn post(&mut self, _endpoint: &str, chunk: &OutgoingChunk<'_>) -> Result<u16, TransportError> {
        let dest = validate_path(&self.root, Path::new(chunk.source), PathPolicy::default())
            .map_err(|e| TransportError::Other(e.to_string()))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).write(true).truncate(false).open(&dest)?;
        f.seek(SeekFrom::Start(chunk.offset))?;
        f.write_all(chunk.data)?;
        if chunk.end_of_source {
            f.set_len(chunk.offset + chunk.data.len() as u64)?;
        }
        f.sync_data()?;
        Ok(201)
    }
}
