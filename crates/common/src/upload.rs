//! Upload orchestration
//!
//! Drives content through the tree builder and onto the network under one
//! of two authorizations:
//!
//! - **self-signed**: we hold the batch owner's key. Chunks are staged first,
//!   slots are planned by the batch's [`UtilizationTracker`], then every
//!   chunk is stamped and submitted, followed by the accounting chunks. The
//!   tracker is only advanced and persisted once everything went through.
//! - **delegated**: the node stamps with a batch id we pass along, so chunks
//!   stream to the network as the builder produces them.
//!
//! Any failed chunk fails the whole upload. Chunks already submitted stay on
//! the network; being content addressed they are harmless.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::chunk::{Chunk, ChunkError, Reference, CHUNK_SIZE};
use crate::network::{Network, NetworkError, Postage, UploadOptions};
use crate::postage::{BatchId, StampError, Stamper, UtilizationError, UtilizationTracker};
use crate::progress::{Progress, ProgressCallback, ProgressTracker};
use crate::store::KvStore;
use crate::tree::{build_tree, leaf_count, ChunkKind, ChunkSink, CollectingSink};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid chunk size {0}, expected 1 to 4096 bytes")]
    InvalidChunkSize(usize),
    #[error("not authorized to upload: {0}")]
    Unauthorized(String),
    #[error("utilization error: {0}")]
    Utilization(#[from] UtilizationError),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),
    #[error("stamp error: {0}")]
    Stamp(#[from] StampError),
}

/// What pays for an upload
#[derive(Debug, Clone)]
pub enum UploadAuth {
    SelfSigned {
        stamper: Stamper,
        tracker: Arc<Mutex<UtilizationTracker>>,
    },
    Delegated {
        batch_id: BatchId,
    },
}

impl UploadAuth {
    pub fn batch_id(&self) -> &BatchId {
        match self {
            UploadAuth::SelfSigned { stamper, .. } => stamper.batch_id(),
            UploadAuth::Delegated { batch_id } => batch_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadDataOptions {
    pub encrypt: bool,
    /// Existing tag to attach chunks to. A new tag is created otherwise.
    pub tag: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub reference: Reference,
    pub tag_uid: u64,
    pub progress: Progress,
}

#[derive(Debug, Clone)]
pub struct UploadOrchestrator {
    network: Arc<dyn Network>,
    store: Arc<dyn KvStore>,
}

impl UploadOrchestrator {
    pub fn new(network: Arc<dyn Network>, store: Arc<dyn KvStore>) -> Self {
        Self { network, store }
    }

    /// Split, optionally encrypt, and upload `data` as a chunk tree
    pub async fn upload_data(
        &self,
        data: &[u8],
        auth: &UploadAuth,
        options: UploadDataOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResult, UploadError> {
        let tag_uid = match options.tag {
            Some(tag) => tag,
            None => self.network.create_tag().await?,
        };
        let upload_options = UploadOptions::with_tag(Some(tag_uid));
        let progress = ProgressTracker::new(leaf_count(data.len()) as u64, progress);

        let (reference, progress) = match auth {
            UploadAuth::SelfSigned { stamper, tracker } => {
                self.upload_self_signed(data, options.encrypt, stamper, tracker, upload_options, progress)
                    .await?
            }
            UploadAuth::Delegated { batch_id } => {
                let mut sink = SubmittingSink {
                    network: self.network.as_ref(),
                    postage: Postage::Batch(*batch_id),
                    options: upload_options,
                    progress,
                };
                let reference = build_tree(data, options.encrypt, &mut sink).await?;
                (reference, sink.progress.current())
            }
        };

        tracing::info!(
            %reference,
            batch_id = %auth.batch_id(),
            bytes = data.len(),
            chunks = progress.total,
            tag_uid,
            "upload complete"
        );
        Ok(UploadResult {
            reference,
            tag_uid,
            progress,
        })
    }

    async fn upload_self_signed(
        &self,
        data: &[u8],
        encrypt: bool,
        stamper: &Stamper,
        tracker: &Mutex<UtilizationTracker>,
        options: UploadOptions,
        mut progress: ProgressTracker,
    ) -> Result<(Reference, Progress), UploadError> {
        // Held for the whole upload so slot plans never interleave
        let mut tracker = tracker.lock().await;

        let mut staged = CollectingSink::new();
        let reference = build_tree(data, encrypt, &mut staged).await?;
        let chunks = staged.into_chunks();
        let addresses: Vec<_> = chunks.iter().map(|(c, _)| *c.address()).collect();
        let update = tracker.calculate_update(&addresses)?;

        for ((chunk, kind), slot) in chunks.iter().zip(update.data_slots()) {
            let stamp = stamper.stamp(chunk.address(), *slot)?;
            self.network
                .upload_chunk(chunk, &Postage::Stamp(stamp), &options)
                .await?;
            if *kind == ChunkKind::Intermediate {
                progress.discovered(1);
            }
            progress.processed();
        }

        for (chunk, slot) in update.accounting() {
            let stamp = stamper.stamp(chunk.address(), *slot)?;
            self.network
                .upload_chunk(chunk, &Postage::Stamp(stamp), &options)
                .await?;
        }
        tracing::debug!(
            accounting_chunks = update.accounting().len(),
            "submitted accounting chunks"
        );

        tracker.commit(update);
        tracker.save(self.store.as_ref()).await?;
        Ok((reference, progress.current()))
    }

    /// Upload a single raw chunk of 1 to 4096 bytes
    pub async fn upload_chunk(
        &self,
        data: &[u8],
        auth: &UploadAuth,
        tag: Option<u64>,
    ) -> Result<Reference, UploadError> {
        if data.is_empty() || data.len() > CHUNK_SIZE {
            return Err(UploadError::InvalidChunkSize(data.len()));
        }
        let chunk = Chunk::content_addressed(Bytes::copy_from_slice(data))?;
        let options = UploadOptions::with_tag(tag);

        match auth {
            UploadAuth::SelfSigned { stamper, tracker } => {
                let mut tracker = tracker.lock().await;
                let update = tracker.calculate_update(&[*chunk.address()])?;
                let stamp = stamper.stamp(chunk.address(), update.data_slots()[0])?;
                self.network
                    .upload_chunk(&chunk, &Postage::Stamp(stamp), &options)
                    .await?;
                for (accounting, slot) in update.accounting() {
                    let stamp = stamper.stamp(accounting.address(), *slot)?;
                    self.network
                        .upload_chunk(accounting, &Postage::Stamp(stamp), &options)
                        .await?;
                }
                tracker.commit(update);
                tracker.save(self.store.as_ref()).await?;
            }
            UploadAuth::Delegated { batch_id } => {
                self.network
                    .upload_chunk(&chunk, &Postage::Batch(*batch_id), &options)
                    .await?;
            }
        }

        tracing::debug!(address = %chunk.address(), "uploaded single chunk");
        Ok(Reference::Plain(*chunk.address()))
    }
}

/// Sink submitting each chunk as soon as it is built
struct SubmittingSink<'a> {
    network: &'a dyn Network,
    postage: Postage,
    options: UploadOptions,
    progress: ProgressTracker,
}

#[async_trait]
impl ChunkSink for SubmittingSink<'_> {
    type Error = UploadError;

    async fn put(&mut self, chunk: Chunk, kind: ChunkKind) -> Result<(), Self::Error> {
        self.network
            .upload_chunk(&chunk, &self.postage, &self.options)
            .await?;
        if kind == ChunkKind::Intermediate {
            self.progress.discovered(1);
        }
        self.progress.processed();
        Ok(())
    }
}
