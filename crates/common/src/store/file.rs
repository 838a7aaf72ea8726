use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{KvStore, StoreError};

/// Longest hex file name written as-is, leaving room for a `.tmp` suffix
/// under the common 255 byte component limit
pub const MAX_NAME_LEN: usize = 200;

const HASHED_PREFIX: &str = "sha256-";

fn file_name(name: &str) -> String {
    let encoded = hex::encode(name);
    if encoded.len() <= MAX_NAME_LEN {
        return encoded;
    }
    format!("{}{}", HASHED_PREFIX, hex::encode(Sha256::digest(name.as_bytes())))
}

/// Directory-backed store
///
/// Each namespace is a subdirectory and each key a file named by the hex
/// encoding of the key, so arbitrary keys such as origins are safe on disk.
/// Names whose hex form would pass [`MAX_NAME_LEN`] are stored under the
/// SHA-256 of the raw name instead. Writes go through a temporary file and
/// a rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(file_name(namespace)).join(file_name(key))
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path(namespace, key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path(namespace, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(namespace, path = %path.display(), "wrote record");
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(namespace, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
