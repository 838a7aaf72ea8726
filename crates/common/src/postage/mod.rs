//! Postage batches
//!
//! A postage batch is a prepaid storage allowance of `2^depth` chunks split
//! into 65536 buckets by address prefix. Writing a chunk under a batch
//! consumes a slot in the chunk's bucket, and the write is authorized by a
//! [`Stamp`] signed by the batch owner.
//!
//! Mutable batches are tracked locally by a [`UtilizationTracker`], which
//! hands out slots and persists its counters between sessions.

mod stamp;
mod utilization;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use stamp::{Stamp, StampError, Stamper, STAMP_SIZE};
pub use utilization::{
    SlotAssignment, UtilizationError, UtilizationSnapshot, UtilizationTracker, UtilizationUpdate,
    BUCKET_COUNT, RESERVED_SLOTS, UTILIZATION_NAMESPACE,
};

/// Size of a batch id in bytes
pub const BATCH_ID_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
#[error("invalid batch id: {0}")]
pub struct BatchIdError(String);

/// Identifier of a postage batch, rendered as 64 hex characters
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId([u8; BATCH_ID_SIZE]);

impl BatchId {
    pub fn as_bytes(&self) -> &[u8; BATCH_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; BATCH_ID_SIZE]> for BatchId {
    fn from(bytes: [u8; BATCH_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl FromStr for BatchId {
    type Err = BatchIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut buff = [0u8; BATCH_ID_SIZE];
        hex::decode_to_slice(s, &mut buff).map_err(|e| BatchIdError(e.to_string()))?;
        Ok(Self(buff))
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({})", self.to_hex())
    }
}

impl Serialize for BatchId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BatchId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
