use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{FileDownload, Network, NetworkError, Postage, UploadOptions};
use crate::chunk::{Address, Chunk, Reference};
use crate::crypto::PublicKey;
use crate::postage::BatchId;
use crate::tree::{build_tree, CollectingSink};

/// A chunk submission as the network saw it
#[derive(Debug, Clone)]
pub struct Submission {
    pub address: Address,
    pub postage: Postage,
    pub options: UploadOptions,
}

#[derive(Debug, Default)]
struct Inner {
    chunks: HashMap<Address, Chunk>,
    files: HashMap<Reference, (Bytes, Option<String>, Option<String>)>,
    submissions: Vec<Submission>,
    fail_after: Option<usize>,
    owner: Option<PublicKey>,
}

/// In-memory network for tests
///
/// Records every submission, optionally verifies stamps against a batch
/// owner key, and can be told to start failing after a number of uploads.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNetwork {
    inner: Arc<RwLock<Inner>>,
    next_tag: Arc<AtomicU64>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject stamps not signed by `owner`
    pub fn with_owner(self, owner: PublicKey) -> Self {
        self.inner.write().owner = Some(owner);
        self
    }

    /// Fail every chunk upload after the first `count` succeed
    pub fn fail_after(&self, count: usize) {
        self.inner.write().fail_after = Some(count);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.read().submissions.clone()
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.read().chunks.len()
    }

    pub fn has_chunk(&self, address: &Address) -> bool {
        self.inner.read().chunks.contains_key(address)
    }

    /// Drop a stored chunk, to exercise missing-chunk paths
    pub fn remove_chunk(&self, address: &Address) {
        self.inner.write().chunks.remove(address);
    }

    /// Store a chunk as-is, bypassing postage checks and submission records
    pub fn insert_chunk(&self, chunk: Chunk) {
        self.inner.write().chunks.insert(*chunk.address(), chunk);
    }
}

#[async_trait]
impl Network for InMemoryNetwork {
    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        postage: &Postage,
        options: &UploadOptions,
    ) -> Result<Address, NetworkError> {
        let mut inner = self.inner.write();
        if let Some(limit) = inner.fail_after {
            if inner.submissions.len() >= limit {
                return Err(NetworkError::Rejected("injected failure".to_string()));
            }
        }
        if options.deferred && options.pin {
            return Err(NetworkError::Rejected(
                "deferred uploads cannot be pinned".to_string(),
            ));
        }
        if let (Postage::Stamp(stamp), Some(owner)) = (postage, inner.owner.as_ref()) {
            stamp
                .verify(chunk.address(), owner)
                .map_err(|e| NetworkError::Rejected(e.to_string()))?;
        }

        inner.chunks.insert(*chunk.address(), chunk.clone());
        inner.submissions.push(Submission {
            address: *chunk.address(),
            postage: postage.clone(),
            options: *options,
        });
        Ok(*chunk.address())
    }

    async fn download_chunk(&self, address: &Address) -> Result<Chunk, NetworkError> {
        let inner = self.inner.read();
        inner
            .chunks
            .get(address)
            .cloned()
            .ok_or(NetworkError::NotFound(*address))
    }

    async fn create_tag(&self) -> Result<u64, NetworkError> {
        Ok(self.next_tag.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn upload_file(
        &self,
        data: Bytes,
        name: Option<&str>,
        content_type: Option<&str>,
        _batch_id: &BatchId,
        _options: &UploadOptions,
    ) -> Result<Reference, NetworkError> {
        let mut sink = CollectingSink::new();
        let reference = build_tree(&data, false, &mut sink).await?;

        let mut inner = self.inner.write();
        for (chunk, _) in sink.into_chunks() {
            inner.chunks.insert(*chunk.address(), chunk);
        }
        let content_type = content_type
            .map(str::to_string)
            .or_else(|| name.and_then(|n| mime_guess::from_path(n).first_raw().map(str::to_string)));
        inner
            .files
            .insert(reference, (data, name.map(str::to_string), content_type));
        Ok(reference)
    }

    async fn download_file(
        &self,
        reference: &Reference,
        _path: Option<&str>,
    ) -> Result<FileDownload, NetworkError> {
        let inner = self.inner.read();
        let (data, name, content_type) = inner
            .files
            .get(reference)
            .cloned()
            .ok_or(NetworkError::NotFound(*reference.address()))?;
        Ok(FileDownload {
            data,
            name,
            content_type,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_store_and_fetch() {
        let network = InMemoryNetwork::new();
        let chunk = Chunk::content_addressed(&b"data"[..]).unwrap();
        let postage = Postage::Batch(BatchId::from([1u8; 32]));
        network
            .upload_chunk(&chunk, &postage, &UploadOptions::default())
            .await
            .unwrap();

        let fetched = network.download_chunk(chunk.address()).await.unwrap();
        assert_eq!(fetched, chunk);
        assert_eq!(network.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_chunks() {
        let network = InMemoryNetwork::new();
        let clone = network.clone();
        let chunk = Chunk::content_addressed(&b"shared"[..]).unwrap();
        clone.insert_chunk(chunk.clone());

        assert!(network.has_chunk(chunk.address()));
        assert!(network.submissions().is_empty());
        network.remove_chunk(chunk.address());
        assert_eq!(clone.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_chunk() {
        let network = InMemoryNetwork::new();
        let address = Address::from([0u8; 32]);
        assert!(matches!(
            network.download_chunk(&address).await,
            Err(NetworkError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let network = InMemoryNetwork::new();
        network.fail_after(1);
        let postage = Postage::Batch(BatchId::from([1u8; 32]));
        let options = UploadOptions::default();
        let a = Chunk::content_addressed(&b"a"[..]).unwrap();
        let b = Chunk::content_addressed(&b"b"[..]).unwrap();
        assert!(network.upload_chunk(&a, &postage, &options).await.is_ok());
        assert!(network.upload_chunk(&b, &postage, &options).await.is_err());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let network = InMemoryNetwork::new();
        let reference = network
            .upload_file(
                Bytes::from_static(b"<h1>hi</h1>"),
                Some("index.html"),
                None,
                &BatchId::from([1u8; 32]),
                &UploadOptions::default(),
            )
            .await
            .unwrap();
        let file = network.download_file(&reference, None).await.unwrap();
        assert_eq!(&file.data[..], b"<h1>hi</h1>");
        assert_eq!(file.content_type.as_deref(), Some("text/html"));
        assert_eq!(file.name.as_deref(), Some("index.html"));
    }
}
