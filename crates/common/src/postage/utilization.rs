//! Bucket occupancy of a mutable batch
//!
//! Writing data into a batch means updating the occupancy counters, and the
//! counters are themselves stored as chunks that occupy slots. The tracker
//! breaks that cycle by splitting each bucket in two regions:
//!
//! - slots `[0, 256)` are reserved for the accounting chunks and rewritten
//!   from slot 0 on every update
//! - slots `[256, max)` are handed out to data chunks, append only for the
//!   life of the batch
//!
//! Batches too shallow to hold a reserved region (256 slots or fewer per
//! bucket) start their counters at 0 and do not store accounting chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BatchId;
use crate::chunk::{split, Address, Chunk, ChunkError};
use crate::store::{get_versioned, set_versioned, KvStore, StoreError};

/// Number of buckets a batch is split into
pub const BUCKET_COUNT: usize = 1 << 16;
/// Slots per bucket set aside for accounting chunks
pub const RESERVED_SLOTS: u32 = 256;
/// Store namespace holding one snapshot per batch id
pub const UTILIZATION_NAMESPACE: &str = "utilization";

const BUCKET_DEPTH: u8 = 16;
const MAX_DEPTH: u8 = 47;

#[derive(Debug, thiserror::Error)]
pub enum UtilizationError {
    #[error("bucket {bucket} is full at {max_slots} slots (chunk {address})")]
    BucketFull {
        bucket: u16,
        max_slots: u32,
        address: Address,
    },
    #[error("invalid batch depth {0}")]
    InvalidDepth(u8),
    #[error("snapshot belongs to batch {found}, expected {expected}")]
    BatchMismatch { expected: BatchId, found: BatchId },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),
}

/// Bucket and slot a chunk is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub bucket: u16,
    pub slot: u32,
}

/// The outcome of planning a write, not yet applied to the tracker
#[derive(Debug)]
pub struct UtilizationUpdate {
    counters: Vec<u32>,
    data: Vec<SlotAssignment>,
    accounting: Vec<(Chunk, SlotAssignment)>,
}

impl UtilizationUpdate {
    /// Slots for the data chunks, in the order they were given
    pub fn data_slots(&self) -> &[SlotAssignment] {
        &self.data
    }

    /// Accounting chunks with their reserved slots
    pub fn accounting(&self) -> &[(Chunk, SlotAssignment)] {
        &self.accounting
    }
}

/// Persisted form of the tracker
///
/// Only buckets whose counter moved past the starting value are listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilizationSnapshot {
    pub batch_id: BatchId,
    pub depth: u8,
    pub buckets: Vec<(u16, u32)>,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UtilizationTracker {
    batch_id: BatchId,
    depth: u8,
    counters: Vec<u32>,
    last_update: DateTime<Utc>,
}

impl UtilizationTracker {
    pub fn new(batch_id: BatchId, depth: u8) -> Result<Self, UtilizationError> {
        if !(BUCKET_DEPTH..=MAX_DEPTH).contains(&depth) {
            return Err(UtilizationError::InvalidDepth(depth));
        }
        let baseline = baseline(depth);
        Ok(Self {
            batch_id,
            depth,
            counters: vec![baseline; BUCKET_COUNT],
            last_update: Utc::now(),
        })
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Slots available in every bucket
    pub fn max_slots(&self) -> u32 {
        max_slots(self.depth)
    }

    /// Slots at the bottom of each bucket reserved for accounting
    pub fn reserved_slots(&self) -> u32 {
        baseline(self.depth)
    }

    pub fn counter(&self, bucket: u16) -> u32 {
        self.counters[bucket as usize]
    }

    /// Plan slots for `addresses` and the accounting chunks that record them.
    ///
    /// Nothing changes until the update is passed to [`commit`]. A full
    /// bucket fails the whole update.
    ///
    /// [`commit`]: UtilizationTracker::commit
    pub fn calculate_update(
        &self,
        addresses: &[Address],
    ) -> Result<UtilizationUpdate, UtilizationError> {
        let max_slots = self.max_slots();
        let mut counters = self.counters.clone();
        let mut data = Vec::with_capacity(addresses.len());

        for address in addresses {
            let bucket = address.bucket();
            let counter = &mut counters[bucket as usize];
            if *counter >= max_slots {
                tracing::warn!(
                    batch_id = %self.batch_id,
                    bucket,
                    max_slots,
                    "postage bucket full"
                );
                return Err(UtilizationError::BucketFull {
                    bucket,
                    max_slots,
                    address: *address,
                });
            }
            data.push(SlotAssignment {
                bucket,
                slot: *counter,
            });
            *counter += 1;
        }

        let accounting = if self.reserved_slots() > 0 {
            self.accounting_chunks(&counters)?
        } else {
            Vec::new()
        };

        tracing::debug!(
            batch_id = %self.batch_id,
            data_chunks = data.len(),
            accounting_chunks = accounting.len(),
            "calculated utilization update"
        );

        Ok(UtilizationUpdate {
            counters,
            data,
            accounting,
        })
    }

    fn accounting_chunks(
        &self,
        counters: &[u32],
    ) -> Result<Vec<(Chunk, SlotAssignment)>, UtilizationError> {
        let mut serialized = Vec::with_capacity(counters.len() * 4);
        for counter in counters {
            serialized.extend_from_slice(&counter.to_le_bytes());
        }

        let mut next_slot = std::collections::HashMap::<u16, u32>::new();
        let mut chunks = Vec::new();
        for piece in split(&serialized) {
            let chunk = Chunk::content_addressed(bytes::Bytes::copy_from_slice(piece))?;
            let bucket = chunk.bucket();
            let slot = next_slot.entry(bucket).or_insert(0);
            if *slot >= self.reserved_slots() {
                return Err(UtilizationError::BucketFull {
                    bucket,
                    max_slots: self.reserved_slots(),
                    address: *chunk.address(),
                });
            }
            let assignment = SlotAssignment {
                bucket,
                slot: *slot,
            };
            *slot += 1;
            chunks.push((chunk, assignment));
        }
        Ok(chunks)
    }

    /// Apply a previously calculated update
    pub fn commit(&mut self, update: UtilizationUpdate) {
        self.counters = update.counters;
        self.last_update = Utc::now();
    }

    /// Fill level of the fullest bucket, as a percentage capped at 100
    pub fn utilization_percent(&self) -> f64 {
        let fullest = self.counters.iter().copied().max().unwrap_or(0);
        (fullest as f64 / self.max_slots() as f64 * 100.0).min(100.0)
    }

    pub fn snapshot(&self) -> UtilizationSnapshot {
        let baseline = self.reserved_slots();
        let buckets = self
            .counters
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != baseline)
            .map(|(i, c)| (i as u16, *c))
            .collect();
        UtilizationSnapshot {
            batch_id: self.batch_id,
            depth: self.depth,
            buckets,
            last_update: self.last_update,
        }
    }

    pub fn from_snapshot(snapshot: UtilizationSnapshot) -> Result<Self, UtilizationError> {
        let mut tracker = Self::new(snapshot.batch_id, snapshot.depth)?;
        let max_slots = tracker.max_slots();
        for (bucket, counter) in snapshot.buckets {
            tracker.counters[bucket as usize] = counter.min(max_slots);
        }
        tracker.last_update = snapshot.last_update;
        Ok(tracker)
    }

    /// Load the persisted tracker for `batch_id`, or start a fresh one
    pub async fn load_or_new(
        store: &(impl KvStore + ?Sized),
        batch_id: BatchId,
        depth: u8,
    ) -> Result<Self, UtilizationError> {
        let key = batch_id.to_hex();
        match get_versioned::<UtilizationSnapshot>(store, UTILIZATION_NAMESPACE, &key).await? {
            Some(snapshot) => {
                if snapshot.batch_id != batch_id {
                    return Err(UtilizationError::BatchMismatch {
                        expected: batch_id,
                        found: snapshot.batch_id,
                    });
                }
                tracing::debug!(%batch_id, buckets = snapshot.buckets.len(), "loaded utilization");
                Self::from_snapshot(snapshot)
            }
            None => Self::new(batch_id, depth),
        }
    }

    pub async fn save(&self, store: &(impl KvStore + ?Sized)) -> Result<(), UtilizationError> {
        let snapshot = self.snapshot();
        set_versioned(
            store,
            UTILIZATION_NAMESPACE,
            &self.batch_id.to_hex(),
            &snapshot,
        )
        .await?;
        tracing::debug!(
            batch_id = %self.batch_id,
            buckets = snapshot.buckets.len(),
            "saved utilization"
        );
        Ok(())
    }
}

fn max_slots(depth: u8) -> u32 {
    1u32 << (depth - BUCKET_DEPTH)
}

fn baseline(depth: u8) -> u32 {
    if max_slots(depth) > RESERVED_SLOTS {
        RESERVED_SLOTS
    } else {
        0
    }
}
