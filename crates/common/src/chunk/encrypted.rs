use super::{Chunk, ChunkError, CHUNK_SIZE, SPAN_SIZE};
use crate::crypto::Secret;

/// Keystream counter the span is encrypted at, one past the last payload segment
pub const ENCRYPTED_SPAN_COUNTER: u32 = (CHUNK_SIZE / 32) as u32;

/// An encrypted chunk together with the key that opens it
///
/// The wire form is the encrypted span followed by a full 4096-byte
/// encrypted payload, and the address is computed over those bytes. Leaf
/// payloads are padded with random bytes before encryption, intermediate
/// payloads with zeros.
#[derive(Debug, Clone)]
pub struct EncryptedChunk {
    chunk: Chunk,
    key: Secret,
    span: u64,
}

impl EncryptedChunk {
    /// Encrypt `payload` under a fresh random key
    pub fn encrypt(span: u64, payload: &[u8], zero_pad: bool) -> Result<Self, ChunkError> {
        Self::encrypt_with_key(Secret::generate(), span, payload, zero_pad)
    }

    pub fn encrypt_with_key(
        key: Secret,
        span: u64,
        payload: &[u8],
        zero_pad: bool,
    ) -> Result<Self, ChunkError> {
        if payload.len() > CHUNK_SIZE {
            return Err(ChunkError::PayloadTooLarge(payload.len()));
        }
        let encrypted_payload = key
            .transform_padded(payload, CHUNK_SIZE, 0, zero_pad)
            .map_err(|e| anyhow::anyhow!(e))?;
        let encrypted_span = key.transform(&span.to_le_bytes(), ENCRYPTED_SPAN_COUNTER);

        let mut span_bytes = [0u8; SPAN_SIZE];
        span_bytes.copy_from_slice(&encrypted_span);
        let chunk = Chunk::new(span_bytes, encrypted_payload)?;
        Ok(Self { chunk, key, span })
    }

    /// Decrypt a fetched chunk, returning the real span and the full
    /// decrypted payload including padding.
    pub fn decrypt(chunk: &Chunk, key: &Secret) -> Result<(u64, Vec<u8>), ChunkError> {
        let span_bytes = key.transform(chunk.span_bytes(), ENCRYPTED_SPAN_COUNTER);
        let mut span = [0u8; SPAN_SIZE];
        span.copy_from_slice(&span_bytes);
        let payload = key.transform(chunk.payload(), 0);
        Ok((u64::from_le_bytes(span), payload))
    }

    /// The chunk as it is submitted to the network
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn into_chunk(self) -> Chunk {
        self.chunk
    }

    pub fn key(&self) -> &Secret {
        &self.key
    }

    /// Plaintext span
    pub fn span(&self) -> u64 {
        self.span
    }
}
