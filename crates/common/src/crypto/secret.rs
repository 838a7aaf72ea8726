//! Chunk encryption keys
//!
//! Every encrypted chunk gets its own random `Secret`. The cipher is a
//! Keccak-256 keystream applied per 32-byte segment: segment `i` is XORed with
//! `keccak256(keccak256(key || u32_le(i + counter)))`. Encryption and decryption
//! are the same transform, and the output keeps the input length so a chunk's
//! address can be computed over the ciphertext.

use std::ops::Deref;

use serde::{Deserialize, Serialize};

use super::keccak256;

/// Size of a chunk encryption key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Width of one keystream segment
const SEGMENT_SIZE: usize = 32;

/// Errors that can occur while handling chunk keys
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("failed to gather randomness: {0}")]
    Random(getrandom::Error),
}

/// A 256-bit symmetric key for a single chunk
///
/// # Examples
///
/// ```ignore
/// let secret = Secret::generate();
/// let ciphertext = secret.transform(b"payload", 0);
/// let plaintext = secret.transform(&ciphertext, 0);
/// assert_eq!(&plaintext[..], b"payload");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Secret([u8; SECRET_SIZE]);

impl Default for Secret {
    fn default() -> Self {
        Secret([0; SECRET_SIZE])
    }
}

impl Deref for Secret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using a cryptographically secure RNG
    pub fn generate() -> Self {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Apply the keystream to `data`, starting at segment `counter`.
    ///
    /// Output length equals input length; applying the transform twice with
    /// the same counter yields the original bytes.
    pub fn transform(&self, data: &[u8], counter: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (i, segment) in data.chunks(SEGMENT_SIZE).enumerate() {
            let keystream = self.segment_key(counter.wrapping_add(i as u32));
            out.extend(segment.iter().zip(keystream.iter()).map(|(b, k)| b ^ k));
        }
        out
    }

    /// Transform `data` after padding it to `padded_len` bytes.
    ///
    /// The padding is random unless `zero_pad` is set. Inputs already at
    /// least `padded_len` long are transformed as-is.
    pub fn transform_padded(
        &self,
        data: &[u8],
        padded_len: usize,
        counter: u32,
        zero_pad: bool,
    ) -> Result<Vec<u8>, SecretError> {
        if data.len() >= padded_len {
            return Ok(self.transform(data, counter));
        }
        let mut padded = Vec::with_capacity(padded_len);
        padded.extend_from_slice(data);
        padded.resize(padded_len, 0);
        if !zero_pad {
            getrandom::getrandom(&mut padded[data.len()..]).map_err(SecretError::Random)?;
        }
        Ok(self.transform(&padded, counter))
    }

    fn segment_key(&self, counter: u32) -> [u8; SEGMENT_SIZE] {
        let counter_hash = keccak256(&[self.bytes(), counter.to_le_bytes().as_slice()]);
        keccak256(&[counter_hash.as_slice()])
    }
}
