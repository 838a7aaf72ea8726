//! Persisted application sessions
//!
//! One [`SessionRecord`] per application origin, written only by the
//! broker. Its presence is what makes an origin authenticated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use common::crypto::{KeyError, SecretKey};
use common::postage::{BatchId, BatchIdError, Stamper, UtilizationError, UtilizationTracker};
use common::store::{get_versioned, set_versioned, KvStore, StoreError};
use common::upload::UploadAuth;

use crate::messages::SecretBundle;

/// Store namespace holding one record per application origin
pub const SESSION_NAMESPACE: &str = "sessions";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid signer key: {0}")]
    SignerKey(#[from] KeyError),
    #[error("{0}")]
    BatchId(#[from] BatchIdError),
    #[error("utilization error: {0}")]
    Utilization(#[from] UtilizationError),
    #[error("signer key must be 64 hex characters")]
    SignerKeyLength,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub app_origin: String,
    pub app_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// Hex encoded postage signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("app_origin", &self.app_origin)
            .field("batch_id", &self.batch_id)
            .field("has_signer_key", &self.signer_key.is_some())
            .field("depth", &self.depth)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SessionRecord {
    /// Validate a secret bundle and turn it into a record for `app_origin`
    pub fn from_bundle(app_origin: &str, bundle: SecretBundle) -> Result<Self, SessionError> {
        let batch_id = bundle
            .postage_batch_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(str::parse::<BatchId>)
            .transpose()?;
        let signer_key = match bundle.signer_key.filter(|key| !key.is_empty()) {
            Some(key) => {
                let hex = key.strip_prefix("0x").unwrap_or(&key);
                if hex.len() != 64 {
                    return Err(SessionError::SignerKeyLength);
                }
                SecretKey::from_hex(hex)?;
                Some(hex.to_string())
            }
            None => None,
        };
        Ok(Self {
            app_origin: app_origin.to_string(),
            app_secret: bundle.secret,
            batch_id,
            signer_key,
            depth: bundle.depth,
            created_at: Utc::now(),
        })
    }

    pub async fn load(
        store: &(impl KvStore + ?Sized),
        app_origin: &str,
    ) -> Result<Option<Self>, SessionError> {
        Ok(get_versioned(store, SESSION_NAMESPACE, app_origin).await?)
    }

    pub async fn save(&self, store: &(impl KvStore + ?Sized)) -> Result<(), SessionError> {
        set_versioned(store, SESSION_NAMESPACE, &self.app_origin, self).await?;
        tracing::debug!(origin = %self.app_origin, "saved session");
        Ok(())
    }

    pub async fn delete(
        store: &(impl KvStore + ?Sized),
        app_origin: &str,
    ) -> Result<(), SessionError> {
        store.delete(SESSION_NAMESPACE, app_origin).await?;
        tracing::debug!(origin = %app_origin, "deleted session");
        Ok(())
    }

    /// Rebuild the upload authorization this session grants
    ///
    /// A signer key with a batch id yields a self-signed uploader whose
    /// tracker resumes from the persisted utilization of that batch. A batch
    /// id alone yields delegated uploads. Neither means the session cannot
    /// upload at all.
    pub async fn upload_auth(
        &self,
        store: &(impl KvStore + ?Sized),
        default_depth: u8,
    ) -> Result<Option<UploadAuth>, SessionError> {
        let Some(batch_id) = self.batch_id else {
            return Ok(None);
        };
        let Some(signer_key) = &self.signer_key else {
            return Ok(Some(UploadAuth::Delegated { batch_id }));
        };

        let depth = self.depth.unwrap_or(default_depth);
        let key = SecretKey::from_hex(signer_key)?;
        let tracker = UtilizationTracker::load_or_new(store, batch_id, depth).await?;
        let stamper = Stamper::new(key, batch_id, tracker.depth());
        Ok(Some(UploadAuth::SelfSigned {
            stamper,
            tracker: Arc::new(Mutex::new(tracker)),
        }))
    }
}
