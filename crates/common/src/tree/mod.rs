//! Merkle trees of chunks
//!
//! Content larger than one chunk is stored as a tree: leaves hold the data,
//! intermediate chunks hold up to 64 child references and record the total
//! number of data bytes beneath them as their span. Building is level by
//! level, each level fully delivered to the sink before the next one is
//! started, until a single reference remains.
//!
//! Trees are uniform in depth: a level with a lone trailing reference still
//! wraps it, so a reader can derive every node's level from the root span.

mod sink;

use bytes::Bytes;

use crate::chunk::{
    split, Chunk, ChunkError, EncryptedChunk, Reference, ADDRESS_SIZE, CHUNK_SIZE,
    ENCRYPTED_REFERENCE_SIZE,
};

pub use sink::{ChunkKind, ChunkSink, CollectingSink};

/// Number of references packed into one intermediate chunk
pub const BRANCHES: usize = 64;

/// A reference along with the number of data bytes it covers
#[derive(Debug, Clone, Copy)]
struct Entry {
    reference: Reference,
    span: u64,
}

/// Build the chunk tree for `data`, delivering every chunk to `sink`.
///
/// Returns the root reference. Content that fits in a single chunk is its
/// own root. Empty content becomes one empty leaf. With `encrypt` set every
/// chunk gets a fresh key and the result is a 64-byte encrypted reference.
pub async fn build_tree<S>(data: &[u8], encrypt: bool, sink: &mut S) -> Result<Reference, S::Error>
where
    S: ChunkSink + ?Sized,
{
    let mut level = Vec::with_capacity(leaf_count(data.len()));
    let pieces: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        split(data).collect()
    };

    for piece in pieces {
        let span = piece.len() as u64;
        let (chunk, reference) = encode(span, piece, encrypt, false)?;
        tracing::debug!(address = %chunk.address(), span, "built leaf chunk");
        sink.put(chunk, ChunkKind::Leaf).await?;
        level.push(Entry { reference, span });
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(BRANCHES));
        for group in level.chunks(BRANCHES) {
            let span = group.iter().map(|e| e.span).sum();
            let mut payload = Vec::with_capacity(group.len() * ENCRYPTED_REFERENCE_SIZE);
            for entry in group {
                payload.extend_from_slice(&entry.reference.to_bytes());
            }
            let (chunk, reference) = encode(span, &payload, encrypt, true)?;
            tracing::debug!(
                address = %chunk.address(),
                span,
                children = group.len(),
                "built intermediate chunk"
            );
            sink.put(chunk, ChunkKind::Intermediate).await?;
            next.push(Entry { reference, span });
        }
        level = next;
    }

    level
        .pop()
        .map(|e| e.reference)
        .ok_or_else(|| ChunkError::Default(anyhow::anyhow!("tree has no root")).into())
}

fn encode(
    span: u64,
    payload: &[u8],
    encrypt: bool,
    zero_pad: bool,
) -> Result<(Chunk, Reference), ChunkError> {
    if encrypt {
        let encrypted = EncryptedChunk::encrypt(span, payload, zero_pad)?;
        let reference = Reference::Encrypted {
            address: *encrypted.chunk().address(),
            key: *encrypted.key(),
        };
        Ok((encrypted.into_chunk(), reference))
    } else {
        let chunk = Chunk::with_span(span, Bytes::copy_from_slice(payload))?;
        let reference = Reference::Plain(*chunk.address());
        Ok((chunk, reference))
    }
}

/// Number of leaves content of `len` bytes splits into
pub fn leaf_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE).max(1)
}

/// Number of data bytes a single node at `level` can cover
fn level_capacity(level: u32) -> u128 {
    CHUNK_SIZE as u128 * (BRANCHES as u128).pow(level)
}

/// Level of the root of a tree spanning `span` bytes, leaves being level 0
pub fn tree_depth(span: u64) -> u32 {
    let mut depth = 0;
    while level_capacity(depth) < span as u128 {
        depth += 1;
    }
    depth
}

/// A decoded tree node
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(Bytes),
    Intermediate {
        span: u64,
        children: Vec<Reference>,
    },
}

/// Number of data bytes below a chunk, opening it if encrypted
pub fn node_span(reference: &Reference, chunk: &Chunk) -> Result<u64, ChunkError> {
    match reference {
        Reference::Plain(_) => Ok(chunk.span()),
        Reference::Encrypted { key, .. } => Ok(EncryptedChunk::decrypt(chunk, key)?.0),
    }
}

/// Decode a fetched chunk into a node, given the level it sits at.
///
/// The chunk is opened with the key carried by `reference` when encrypted.
/// Use `tree_depth` on the root span to find the root's level; children of
/// a node at level `k` sit at level `k - 1`.
pub fn open_node(reference: &Reference, chunk: &Chunk, level: u32) -> Result<Node, ChunkError> {
    let (span, payload) = match reference {
        Reference::Plain(_) => (chunk.span(), chunk.payload().clone()),
        Reference::Encrypted { key, .. } => {
            let (span, payload) = EncryptedChunk::decrypt(chunk, key)?;
            (span, Bytes::from(payload))
        }
    };

    if level == 0 {
        let len = usize::try_from(span).unwrap_or(usize::MAX);
        if len > payload.len() {
            return Err(ChunkError::InvalidReference(format!(
                "leaf {} claims {} bytes but carries {}",
                chunk.address(),
                span,
                payload.len()
            )));
        }
        return Ok(Node::Leaf(payload.slice(..len)));
    }

    let width = match reference {
        Reference::Plain(_) => ADDRESS_SIZE,
        Reference::Encrypted { .. } => ENCRYPTED_REFERENCE_SIZE,
    };
    let count = (span as u128).div_ceil(level_capacity(level - 1)) as usize;
    if count == 0 || count > BRANCHES || count * width > payload.len() {
        return Err(ChunkError::InvalidReference(format!(
            "intermediate chunk {} with span {} does not fit its payload",
            chunk.address(),
            span
        )));
    }

    let children = payload[..count * width]
        .chunks(width)
        .map(Reference::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Node::Intermediate { span, children })
}

#[cfg(test)]
mod test {
    use super::*;

    async fn collect(data: &[u8], encrypt: bool) -> (Reference, CollectingSink) {
        let mut sink = CollectingSink::new();
        let root = build_tree(data, encrypt, &mut sink).await.unwrap();
        (root, sink)
    }

    #[tokio::test]
    async fn test_single_chunk_is_its_own_root() {
        let (root, sink) = collect(b"small payload", false).await;
        assert_eq!(sink.chunks().len(), 1);
        let (chunk, kind) = &sink.chunks()[0];
        assert_eq!(*kind, ChunkKind::Leaf);
        assert_eq!(root, Reference::Plain(*chunk.address()));
    }

    #[tokio::test]
    async fn test_single_encrypted_chunk_is_its_own_root() {
        let (root, sink) = collect(&[9u8; CHUNK_SIZE], true).await;
        assert_eq!(sink.chunks().len(), 1);
        assert!(root.is_encrypted());
        assert_eq!(root.address(), sink.chunks()[0].0.address());
    }

    #[tokio::test]
    async fn test_empty_content_is_one_empty_leaf() {
        let (root, sink) = collect(b"", false).await;
        assert_eq!(sink.chunks().len(), 1);
        assert_eq!(sink.chunks()[0].0.span(), 0);
        assert_eq!(root.address(), sink.chunks()[0].0.address());
    }

    #[tokio::test]
    async fn test_leaves_delivered_before_intermediates() {
        let data = vec![3u8; CHUNK_SIZE * 3 + 10];
        let (_, sink) = collect(&data, false).await;
        let kinds: Vec<ChunkKind> = sink.chunks().iter().map(|(_, k)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkKind::Leaf,
                ChunkKind::Leaf,
                ChunkKind::Leaf,
                ChunkKind::Leaf,
                ChunkKind::Intermediate
            ]
        );
    }

    #[tokio::test]
    async fn test_intermediate_span_is_sum_of_children() {
        let data = vec![1u8; 10_000];
        let (root, sink) = collect(&data, true).await;
        let (root_chunk, kind) = sink.chunks().last().unwrap();
        assert_eq!(*kind, ChunkKind::Intermediate);
        assert_eq!(root_chunk.payload().len(), CHUNK_SIZE);

        match open_node(&root, root_chunk, tree_depth(10_000)).unwrap() {
            Node::Intermediate { span, children } => {
                assert_eq!(span, 10_000);
                assert_eq!(children.len(), 3);
                assert!(children.iter().all(|c| c.is_encrypted()));
            }
            Node::Leaf(_) => panic!("expected an intermediate root"),
        }
    }

    #[tokio::test]
    async fn test_lone_trailing_leaf_is_wrapped() {
        let data = vec![0u8; CHUNK_SIZE * (BRANCHES + 1)];
        let (_, sink) = collect(&data, false).await;
        assert_eq!(sink.count(ChunkKind::Leaf), BRANCHES + 1);
        // Two intermediates at level one, one root at level two
        assert_eq!(sink.count(ChunkKind::Intermediate), 3);
    }

    #[test]
    fn test_tree_depth() {
        assert_eq!(tree_depth(0), 0);
        assert_eq!(tree_depth(CHUNK_SIZE as u64), 0);
        assert_eq!(tree_depth(CHUNK_SIZE as u64 + 1), 1);
        assert_eq!(tree_depth((CHUNK_SIZE * BRANCHES) as u64), 1);
        assert_eq!(tree_depth((CHUNK_SIZE * BRANCHES) as u64 + 1), 2);
        assert_eq!(tree_depth(u64::MAX), 9);
    }

    #[test]
    fn test_leaf_count() {
        assert_eq!(leaf_count(0), 1);
        assert_eq!(leaf_count(1), 1);
        assert_eq!(leaf_count(10_000), 3);
    }
}
