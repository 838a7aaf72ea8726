use async_trait::async_trait;

use crate::chunk::{Chunk, ChunkError};

/// Position of a chunk within its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Leaf,
    Intermediate,
}

/// Destination for chunks as the tree builder produces them
///
/// The builder never talks to the network itself. Whatever receives the
/// chunks decides whether to submit, stamp, count or simply collect them.
#[async_trait]
pub trait ChunkSink: Send {
    type Error: From<ChunkError> + Send;

    async fn put(&mut self, chunk: Chunk, kind: ChunkKind) -> Result<(), Self::Error>;
}

/// Sink that keeps every chunk in order, for staging and tests
#[derive(Debug, Default)]
pub struct CollectingSink {
    chunks: Vec<(Chunk, ChunkKind)>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[(Chunk, ChunkKind)] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<(Chunk, ChunkKind)> {
        self.chunks
    }

    pub fn count(&self, kind: ChunkKind) -> usize {
        self.chunks.iter().filter(|(_, k)| *k == kind).count()
    }
}

#[async_trait]
impl ChunkSink for CollectingSink {
    type Error = ChunkError;

    async fn put(&mut self, chunk: Chunk, kind: ChunkKind) -> Result<(), Self::Error> {
        self.chunks.push((chunk, kind));
        Ok(())
    }
}
