//! Content-addressed chunks
//!
//! A chunk is the unit of storage on the network: an 8-byte little-endian
//! span followed by at most 4096 bytes of payload. Its address is the
//! Keccak-256 of the span and the binary merkle tree root of the payload,
//! so anyone can check a chunk against the address it was fetched by.
//!
//! Leaf chunks carry file data and their span is the payload length.
//! Intermediate chunks carry child references and their span is the total
//! number of file bytes beneath them.

mod address;
mod encrypted;
mod reference;
mod split;

use bytes::Bytes;

pub use address::{Address, ADDRESS_SIZE};
pub use encrypted::{EncryptedChunk, ENCRYPTED_SPAN_COUNTER};
pub use reference::{Reference, ENCRYPTED_REFERENCE_SIZE};
pub use split::split;

/// Maximum payload size of a single chunk
pub const CHUNK_SIZE: usize = 4096;
/// Size of the little-endian span prefix
pub const SPAN_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("payload of {0} bytes exceeds the chunk size")]
    PayloadTooLarge(usize),
    #[error("chunk data of {0} bytes is shorter than a span")]
    Truncated(usize),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("chunk does not match address {expected}")]
    AddressMismatch { expected: Address },
    #[error("chunk error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A chunk as it travels over the wire
///
/// The span bytes are kept raw: for an encrypted chunk they are ciphertext
/// and only the holder of the chunk key can read the real span.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    span: [u8; SPAN_SIZE],
    payload: Bytes,
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("span", &self.span())
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Chunk {
    /// Build a chunk from raw span bytes and a payload
    pub fn new(span: [u8; SPAN_SIZE], payload: impl Into<Bytes>) -> Result<Self, ChunkError> {
        let payload = payload.into();
        let address = Address::compute(&span, &payload)?;
        Ok(Self {
            address,
            span,
            payload,
        })
    }

    /// Build a chunk with an explicit span, as intermediate chunks need
    pub fn with_span(span: u64, payload: impl Into<Bytes>) -> Result<Self, ChunkError> {
        Self::new(span.to_le_bytes(), payload)
    }

    /// Build a leaf chunk whose span is its payload length
    pub fn content_addressed(payload: impl Into<Bytes>) -> Result<Self, ChunkError> {
        let payload = payload.into();
        Self::with_span(payload.len() as u64, payload)
    }

    /// Parse the wire form `span || payload`
    pub fn from_data(data: &[u8]) -> Result<Self, ChunkError> {
        if data.len() < SPAN_SIZE {
            return Err(ChunkError::Truncated(data.len()));
        }
        let mut span = [0u8; SPAN_SIZE];
        span.copy_from_slice(&data[..SPAN_SIZE]);
        Self::new(span, Bytes::copy_from_slice(&data[SPAN_SIZE..]))
    }

    /// Parse the wire form and check it hashes to `expected`
    pub fn verified(expected: &Address, data: &[u8]) -> Result<Self, ChunkError> {
        let chunk = Self::from_data(data)?;
        if chunk.address != *expected {
            return Err(ChunkError::AddressMismatch {
                expected: *expected,
            });
        }
        Ok(chunk)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Span as a number. Meaningless for encrypted chunks.
    pub fn span(&self) -> u64 {
        u64::from_le_bytes(self.span)
    }

    pub fn span_bytes(&self) -> &[u8; SPAN_SIZE] {
        &self.span
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Wire form `span || payload`
    pub fn data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SPAN_SIZE + self.payload.len());
        data.extend_from_slice(&self.span);
        data.extend_from_slice(&self.payload);
        data
    }

    pub fn bucket(&self) -> u16 {
        self.address.bucket()
    }
}
