//! Storage network capability
//!
//! Everything the core needs from a storage node: submit a chunk, fetch a
//! chunk, create a tag for upload tracking, and the node-side file
//! endpoints. [`HttpNetwork`] talks to a Bee-compatible HTTP API and
//! [`InMemoryNetwork`] keeps everything in a map for tests.

mod http;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::chunk::{Address, Chunk, ChunkError, Reference};
use crate::postage::{BatchId, Stamp};

pub use http::HttpNetwork;
pub use memory::{InMemoryNetwork, Submission};

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(reqwest::StatusCode, String),
    #[error("chunk {0} not found")]
    NotFound(Address),
    #[error("invalid chunk: {0}")]
    InvalidChunk(#[from] ChunkError),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// How a chunk write is paid for
#[derive(Debug, Clone)]
pub enum Postage {
    /// Stamp signed locally by the batch owner
    Stamp(Stamp),
    /// Batch id only, the node stamps on our behalf
    Batch(BatchId),
}

/// Per-request upload switches
///
/// Deferred writes return before the chunk is pushed into the network, and
/// pinning keeps a local copy on the node. The node refuses to do both, so
/// every upload here is deferred and unpinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub deferred: bool,
    pub pin: bool,
    pub tag: Option<u64>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            deferred: true,
            pin: false,
            tag: None,
        }
    }
}

impl UploadOptions {
    pub fn with_tag(tag: Option<u64>) -> Self {
        Self {
            tag,
            ..Self::default()
        }
    }
}

/// A file fetched through the node's file endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    pub data: Bytes,
    pub name: Option<String>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait Network: Send + Sync + Debug {
    /// Submit one chunk, returning the address the node computed
    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        postage: &Postage,
        options: &UploadOptions,
    ) -> Result<Address, NetworkError>;

    /// Fetch a chunk and check it against its address
    async fn download_chunk(&self, address: &Address) -> Result<Chunk, NetworkError>;

    /// Create a tag to group the chunks of one upload
    async fn create_tag(&self) -> Result<u64, NetworkError>;

    /// Upload a whole file, chunked by the node
    async fn upload_file(
        &self,
        data: Bytes,
        name: Option<&str>,
        content_type: Option<&str>,
        batch_id: &BatchId,
        options: &UploadOptions,
    ) -> Result<Reference, NetworkError>;

    /// Download a file uploaded with `upload_file`
    async fn download_file(
        &self,
        reference: &Reference,
        path: Option<&str>,
    ) -> Result<FileDownload, NetworkError>;
}
