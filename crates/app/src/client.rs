//! In-process wiring of the three contexts
//!
//! The CLI plays the host application. It embeds a broker under the
//! broker origin, and when the broker reports no session it signs in
//! through an authentication context sharing the broker's store.

use std::sync::Arc;

use url::Url;

use broker::bus::MessageBus;
use broker::config::{ConfigError, FacadeConfig};
use broker::establisher::{EstablisherError, PostageGrant, SessionEstablisher};
use broker::facade::{BrokerEmbed, FacadeError, HostFacade};
use common::network::{HttpNetwork, Network, NetworkError};
use common::store::KvStore;

use crate::op::resolve_remote;
use crate::state::{AppState, StateError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("broker error: {0}")]
    Facade(#[from] FacadeError),
    #[error("sign-in failed: {0}")]
    SignIn(#[from] EstablisherError),
    #[error("broker still reports no session after sign-in")]
    NotAuthenticated,
}

/// A host facade connected to an embedded broker
pub struct Client {
    bus: MessageBus,
    store: Arc<dyn KvStore>,
    facade: HostFacade,
    remote: Url,
}

impl Client {
    /// Embed a broker for the configured app origin
    pub async fn connect(state: &AppState, remote: Option<&Url>) -> Result<Self, ClientError> {
        let remote = resolve_remote(remote, &state.config.broker)?;
        let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&remote)?);
        Self::connect_with(state, network, remote).await
    }

    /// Embed a broker talking to `network`
    pub async fn connect_with(
        state: &AppState,
        network: Arc<dyn Network>,
        remote: Url,
    ) -> Result<Self, ClientError> {
        let config = &state.config;
        let store = state.store();

        let bus = MessageBus::new();
        let embed = BrokerEmbed::new(config.broker.clone(), store.clone(), network);
        let facade_config = FacadeConfig {
            broker_origin: config.broker.broker_origin.clone(),
            ..Default::default()
        };
        let facade = HostFacade::connect(&bus, &config.app_origin, &embed, facade_config).await?;
        tracing::debug!(%remote, origin = %config.app_origin, "connected to broker");

        Ok(Self {
            bus,
            store,
            facade,
            remote,
        })
    }

    /// Connect and make sure the broker holds a session for this CLI
    pub async fn connect_authenticated(
        state: &AppState,
        remote: Option<&Url>,
    ) -> Result<Self, ClientError> {
        let client = Self::connect(state, remote).await?;
        if !client.facade.is_authenticated() {
            client.sign_in(state).await?;
        }
        Ok(client)
    }

    /// Hand a freshly derived secret and the configured postage to the broker
    pub async fn sign_in(&self, state: &AppState) -> Result<(), ClientError> {
        let postage = &state.config.postage;
        let signer_key = if postage.self_signed {
            Some(state.load_key()?)
        } else {
            None
        };
        let grant = PostageGrant {
            batch_id: postage.batch_id,
            signer_key,
            depth: postage.depth,
        };

        let establisher = SessionEstablisher::new(
            self.bus.connect(state.config.broker.broker_origin.clone()),
            self.store.clone(),
        );
        establisher.master_key_or_generate().await?;
        establisher
            .establish(self.facade.broker_context(), &state.config.app_origin, grant)
            .await?;

        if !self.facade.check_auth().await? {
            return Err(ClientError::NotAuthenticated);
        }
        tracing::info!(origin = %state.config.app_origin, "signed in");
        Ok(())
    }

    pub fn facade(&self) -> &HostFacade {
        &self.facade
    }

    pub fn remote(&self) -> &Url {
        &self.remote
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::{AppConfig, PostageConfig};
    use broker::messages::UploadDataRequestOptions;
    use common::network::InMemoryNetwork;
    use common::postage::BatchId;

    fn remote() -> Url {
        Url::parse("http://localhost:1633").unwrap()
    }

    fn init_state(dir: &std::path::Path, postage: PostageConfig) -> AppState {
        let config = AppConfig {
            postage,
            ..Default::default()
        };
        AppState::init(Some(dir.join("state")), Some(config)).unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_then_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let state = init_state(
            temp.path(),
            PostageConfig {
                batch_id: Some(BatchId::from([9u8; 32])),
                depth: Some(20),
                self_signed: true,
            },
        );
        let network = Arc::new(InMemoryNetwork::new());

        let client = Client::connect_with(&state, network.clone(), remote())
            .await
            .unwrap();
        assert!(!client.facade().is_authenticated());
        client.sign_in(&state).await.unwrap();
        assert!(client.facade().is_authenticated());

        let receipt = client
            .facade()
            .upload_data(b"hello swarm".to_vec(), UploadDataRequestOptions::default(), None)
            .await
            .unwrap();
        let data = client
            .facade()
            .download_data(&receipt.reference.to_hex(), None)
            .await
            .unwrap();
        assert_eq!(data, b"hello swarm");
    }

    #[tokio::test]
    async fn test_session_survives_reconnect() {
        let temp = tempfile::tempdir().unwrap();
        let state = init_state(
            temp.path(),
            PostageConfig {
                batch_id: Some(BatchId::from([9u8; 32])),
                ..Default::default()
            },
        );
        let network: Arc<dyn Network> = Arc::new(InMemoryNetwork::new());

        let first = Client::connect_with(&state, network.clone(), remote())
            .await
            .unwrap();
        first.sign_in(&state).await.unwrap();
        drop(first);

        let second = Client::connect_with(&state, network, remote())
            .await
            .unwrap();
        assert!(second.facade().is_authenticated());
    }

    #[tokio::test]
    async fn test_read_only_session_cannot_upload() {
        let temp = tempfile::tempdir().unwrap();
        let state = init_state(temp.path(), PostageConfig::default());
        let network: Arc<dyn Network> = Arc::new(InMemoryNetwork::new());

        let client = Client::connect_with(&state, network, remote())
            .await
            .unwrap();
        client.sign_in(&state).await.unwrap();
        assert!(client
            .facade()
            .upload_data(b"data".to_vec(), UploadDataRequestOptions::default(), None)
            .await
            .is_err());
    }
}
