//! Session establishment
//!
//! The authentication context runs under the broker's origin, owns the
//! user's master key, and derives one secret per application origin from
//! it. Once the user has signed in it hands that secret, together with any
//! postage material, to the broker with a `setSecret` message.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::crypto::{derive_secret, DeriveError, MasterKey, SecretKey};
use common::postage::BatchId;
use common::store::{get_versioned, set_versioned, KvStore, StoreError};

use crate::bus::{BusError, ContextId, Endpoint};
use crate::messages::{AuthMessage, AuthReply, SecretBundle};

/// Store namespace of the authentication context
pub const IDENTITY_NAMESPACE: &str = "identity";
const MASTER_KEY: &str = "master-key";

#[derive(Debug, thiserror::Error)]
pub enum EstablisherError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Derive(#[from] DeriveError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("no master key, sign in first")]
    NoMasterKey,
    #[error("broker did not acknowledge the secret within {0:?}")]
    Timeout(Duration),
    #[error("broker refused the secret")]
    Rejected,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterKeyRecord {
    key: String,
    created_at: DateTime<Utc>,
}

/// Postage material granted to an application along with its secret
#[derive(Debug, Clone, Default)]
pub struct PostageGrant {
    pub batch_id: Option<BatchId>,
    pub signer_key: Option<SecretKey>,
    pub depth: Option<u8>,
}

#[derive(Debug)]
pub struct SessionEstablisher {
    endpoint: Endpoint,
    store: Arc<dyn KvStore>,
    ack_timeout: Duration,
}

impl SessionEstablisher {
    pub fn new(endpoint: Endpoint, store: Arc<dyn KvStore>) -> Self {
        Self {
            endpoint,
            store,
            ack_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub async fn master_key(&self) -> Result<Option<MasterKey>, EstablisherError> {
        let record: Option<MasterKeyRecord> =
            get_versioned(self.store.as_ref(), IDENTITY_NAMESPACE, MASTER_KEY).await?;
        record
            .map(|record| MasterKey::from_hex(&record.key))
            .transpose()
            .map_err(EstablisherError::from)
    }

    /// Store `key` as the master key, replacing any previous one
    pub async fn set_master_key(&self, key: &MasterKey) -> Result<(), EstablisherError> {
        let record = MasterKeyRecord {
            key: key.to_hex(),
            created_at: Utc::now(),
        };
        set_versioned(self.store.as_ref(), IDENTITY_NAMESPACE, MASTER_KEY, &record).await?;
        tracing::info!("stored master key");
        Ok(())
    }

    /// Load the master key, generating and storing one on first use
    pub async fn master_key_or_generate(&self) -> Result<MasterKey, EstablisherError> {
        if let Some(key) = self.master_key().await? {
            return Ok(key);
        }
        let key = MasterKey::generate();
        self.set_master_key(&key).await?;
        Ok(key)
    }

    /// Derive the secret of `app_origin` and hand it to `broker`
    ///
    /// Returns once the broker acknowledged the secret.
    pub async fn establish(
        &self,
        broker: ContextId,
        app_origin: &str,
        grant: PostageGrant,
    ) -> Result<(), EstablisherError> {
        let master_key = self.master_key().await?.ok_or(EstablisherError::NoMasterKey)?;
        let secret = derive_secret(&master_key, app_origin);

        let message = AuthMessage::SetSecret {
            app_origin: app_origin.to_string(),
            data: SecretBundle {
                secret,
                postage_batch_id: grant.batch_id.map(|id| id.to_hex()),
                signer_key: grant.signer_key.map(|key| key.to_hex()),
                depth: grant.depth,
            },
        };
        // The broker must run under our own origin
        self.endpoint
            .poster()
            .post_to_origin(broker, self.endpoint.origin(), &message)?;
        tracing::debug!(%app_origin, "sent secret to broker");

        let ack = tokio::time::timeout(self.ack_timeout, self.wait_for_ack(broker))
            .await
            .map_err(|_| EstablisherError::Timeout(self.ack_timeout))??;
        if !ack {
            return Err(EstablisherError::Rejected);
        }
        tracing::info!(%app_origin, "session established with broker");
        Ok(())
    }

    async fn wait_for_ack(&self, broker: ContextId) -> Result<bool, EstablisherError> {
        loop {
            let envelope = self.endpoint.recv().await?;
            if envelope.source != broker {
                tracing::debug!(source = %envelope.source, "ignoring message from another context");
                continue;
            }
            match serde_json::from_value::<AuthReply>(envelope.payload) {
                Ok(AuthReply::SecretReceived { success }) => return Ok(success),
                Err(e) => tracing::debug!("ignoring unexpected broker message: {}", e),
            }
        }
    }
}
