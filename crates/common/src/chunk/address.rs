use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ChunkError, CHUNK_SIZE, SPAN_SIZE};
use crate::crypto::keccak256;

/// Size of a chunk address in bytes
pub const ADDRESS_SIZE: usize = 32;
/// Segment width of the binary merkle tree
const SEGMENT_SIZE: usize = 32;

/// Content address of a chunk
///
/// `keccak256(span || bmt_root(payload))`, where the payload is zero padded
/// to a full chunk before hashing. Addresses are rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Compute the address of a chunk from its raw span bytes and payload
    pub fn compute(span: &[u8; SPAN_SIZE], payload: &[u8]) -> Result<Self, ChunkError> {
        if payload.len() > CHUNK_SIZE {
            return Err(ChunkError::PayloadTooLarge(payload.len()));
        }
        let root = bmt_root(payload);
        Ok(Self(keccak256(&[span.as_slice(), root.as_slice()])))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Index of the postage bucket this address falls in.
    ///
    /// The first two address bytes read as a big-endian `u16`.
    pub fn bucket(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }
}

impl From<[u8; ADDRESS_SIZE]> for Address {
    fn from(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = ChunkError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; ADDRESS_SIZE] = bytes
            .try_into()
            .map_err(|_| ChunkError::InvalidAddress(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(bytes))
    }
}

impl FromStr for Address {
    type Err = ChunkError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut buff = [0u8; ADDRESS_SIZE];
        hex::decode_to_slice(s, &mut buff).map_err(|e| ChunkError::InvalidAddress(e.to_string()))?;
        Ok(Self(buff))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

/// Root of the binary keccak merkle tree over a zero padded payload
fn bmt_root(payload: &[u8]) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = Vec::with_capacity(CHUNK_SIZE / SEGMENT_SIZE);
    let mut padded = [0u8; CHUNK_SIZE];
    padded[..payload.len()].copy_from_slice(payload);
    for pair in padded.chunks(SEGMENT_SIZE * 2) {
        level.push(keccak256(&[pair]));
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| keccak256(&[pair[0].as_slice(), pair[1].as_slice()]))
            .collect();
    }
    level[0]
}
