//! Key-value persistence capability
//!
//! Core logic never reaches for a global store. Sessions, master keys and
//! utilization snapshots are read and written through an injected
//! [`KvStore`], always under an explicit namespace so unrelated records
//! cannot collide.
//!
//! Structured values go through [`get_versioned`] / [`set_versioned`], which
//! wrap them as `{version, data}` JSON so the format can evolve.

mod file;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Current version of every persisted record
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported record version {version} at {namespace}/{key}")]
    UnsupportedVersion {
        namespace: String,
        key: String,
        version: u32,
    },
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
}

#[async_trait]
pub trait KvStore: Send + Sync + Debug {
    /// Read the raw bytes under `key`, if any
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write `value` under `key`, replacing what was there
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
struct Versioned<T> {
    version: u32,
    data: T,
}

/// Load a versioned JSON record
pub async fn get_versioned<T>(
    store: &(impl KvStore + ?Sized),
    namespace: &str,
    key: &str,
) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
{
    let Some(bytes) = store.get(namespace, key).await? else {
        return Ok(None);
    };
    let record: Versioned<serde_json::Value> = serde_json::from_slice(&bytes)?;
    if record.version != RECORD_VERSION {
        return Err(StoreError::UnsupportedVersion {
            namespace: namespace.to_string(),
            key: key.to_string(),
            version: record.version,
        });
    }
    Ok(Some(serde_json::from_value(record.data)?))
}

/// Store `data` as a versioned JSON record
pub async fn set_versioned<T>(
    store: &(impl KvStore + ?Sized),
    namespace: &str,
    key: &str,
    data: &T,
) -> Result<(), StoreError>
where
    T: Serialize + Sync,
{
    let record = Versioned {
        version: RECORD_VERSION,
        data,
    };
    store.set(namespace, key, serde_json::to_vec(&record)?).await
}
