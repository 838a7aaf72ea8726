//! Download assembly
//!
//! Walks a chunk tree from its root reference one level at a time, fetching
//! each level with a bounded number of requests in flight, and concatenates
//! the leaves. Every chunk is verified against its address on the way in.
//! A missing chunk anywhere fails the whole read.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};

use crate::chunk::{Address, Chunk, ChunkError, Reference, CHUNK_SIZE};
use crate::network::{Network, NetworkError};
use crate::progress::{Progress, ProgressCallback, ProgressTracker};
use crate::tree::{node_span, open_node, tree_depth, Node, BRANCHES};

/// Default number of chunk fetches in flight
pub const DEFAULT_CONCURRENCY: usize = 64;

/// Default upper bound on the content a single download may reassemble
pub const DEFAULT_MAX_SIZE: u64 = 1 << 30;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),
    #[error("content of {span} bytes exceeds the download limit of {limit} bytes")]
    TooLarge { span: u64, limit: u64 },
}

#[derive(Debug, Clone)]
pub struct DownloadAssembler {
    network: Arc<dyn Network>,
    concurrency: usize,
    max_size: u64,
}

impl DownloadAssembler {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            network,
            concurrency: DEFAULT_CONCURRENCY,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Refuse content whose root claims more than `max_size` bytes
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Reassemble the content behind `reference`
    pub async fn download(
        &self,
        reference: &Reference,
        progress: Option<ProgressCallback>,
    ) -> Result<(Bytes, Progress), DownloadError> {
        let mut progress = ProgressTracker::new(1, progress);
        let root = self.network.download_chunk(reference.address()).await?;
        progress.processed();

        // The root span is unverified until the leaves arrive; a wrong key
        // decrypts it to noise.
        let span = node_span(reference, &root)?;
        if span > self.max_size {
            return Err(DownloadError::TooLarge {
                span,
                limit: self.max_size,
            });
        }
        let mut level = tree_depth(span);
        let mut nodes = vec![(*reference, root)];
        let initial = span.min((CHUNK_SIZE * BRANCHES) as u64) as usize;
        let mut data = BytesMut::with_capacity(initial);

        loop {
            let mut children = Vec::new();
            for (node, chunk) in &nodes {
                match open_node(node, chunk, level)? {
                    Node::Leaf(payload) => {
                        if (data.len() + payload.len()) as u64 > span {
                            return Err(ChunkError::InvalidReference(format!(
                                "leaves of {} exceed its span of {} bytes",
                                reference, span
                            ))
                            .into());
                        }
                        data.extend_from_slice(&payload)
                    }
                    Node::Intermediate { children: refs, .. } => children.extend(refs),
                }
            }
            if children.is_empty() {
                break;
            }

            progress.discovered(children.len() as u64);
            nodes = self.fetch_all(children, &mut progress).await?;
            level -= 1;
        }

        tracing::info!(%reference, bytes = data.len(), chunks = progress.current().total, "download complete");
        Ok((data.freeze(), progress.current()))
    }

    async fn fetch_all(
        &self,
        references: Vec<Reference>,
        progress: &mut ProgressTracker,
    ) -> Result<Vec<(Reference, Chunk)>, DownloadError> {
        let network = &self.network;
        let mut fetches = stream::iter(references)
            .map(|reference| async move {
                network
                    .download_chunk(reference.address())
                    .await
                    .map(|chunk| (reference, chunk))
            })
            .buffered(self.concurrency);

        let mut fetched = Vec::new();
        while let Some(result) = fetches.next().await {
            fetched.push(result?);
            progress.processed();
        }
        Ok(fetched)
    }

    /// Fetch one raw chunk
    pub async fn download_chunk(&self, address: &Address) -> Result<Chunk, DownloadError> {
        Ok(self.network.download_chunk(address).await?)
    }
}
