/**
 * Content-addressed chunks: addressing, wire
 *  format, encryption and references.
 */
pub mod chunk;
/**
 * Cryptographic types and operations.
 *  - Keccak-256 hashing
 *  - Chunk encryption keys
 *  - Postage signing keys
 *  - Per-application secret derivation
 */
pub mod crypto;
/**
 * Reassembling content from the network.
 */
pub mod download;
/**
 * Storage network capability and its
 *  HTTP and in-memory implementations.
 */
pub mod network;
/**
 * Postage batches, stamps, and the bucket
 *  utilization tracker for mutable batches.
 */
pub mod postage;
pub mod progress;
/**
 * Injected key-value persistence.
 */
pub mod store;
/**
 * Merkle tree building over chunks.
 */
pub mod tree;
/**
 * Pushing content to the network.
 */
pub mod upload;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::chunk::{Address, Chunk, ChunkError, Reference, CHUNK_SIZE};
    pub use crate::crypto::{derive_secret, MasterKey, PublicKey, SecretKey};
    pub use crate::download::{DownloadAssembler, DownloadError};
    pub use crate::network::{HttpNetwork, InMemoryNetwork, Network, NetworkError};
    pub use crate::postage::{BatchId, Stamper, UtilizationTracker};
    pub use crate::progress::{Progress, ProgressCallback};
    pub use crate::store::{FileStore, KvStore, MemoryStore, StoreError};
    pub use crate::upload::{UploadAuth, UploadDataOptions, UploadError, UploadOrchestrator};
    pub use crate::version::BuildInfo;
}
