//! Embedding a broker next to a host
//!
//! A host never constructs the broker directly; it asks an [`Embed`] to
//! start one for it, the way a web page creates a frame pointing at the
//! broker's origin. The embed hands back a handle used to tear it down.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use common::network::Network;
use common::store::KvStore;

use super::FacadeError;
use crate::affordance::SignInAffordance;
use crate::broker::{AuthorityBroker, NetworkConnector};
use crate::bus::{ContextId, MessageBus};
use crate::config::BrokerConfig;

#[async_trait]
pub trait Embed: Send + Sync {
    /// Start a broker that reports to the `host` context
    async fn create(
        &self,
        bus: &MessageBus,
        host: ContextId,
    ) -> Result<Box<dyn EmbedHandle>, FacadeError>;
}

pub trait EmbedHandle: Send + Sync + std::fmt::Debug {
    /// Context the embedded broker listens on
    fn context(&self) -> ContextId;

    /// Stop the embedded broker. Safe to call more than once.
    fn detach(&mut self);
}

/// Runs an [`AuthorityBroker`] on a tokio task
#[derive(Clone)]
pub struct BrokerEmbed {
    config: BrokerConfig,
    store: Arc<dyn KvStore>,
    network: Arc<dyn Network>,
    connector: Option<NetworkConnector>,
    affordance: Option<Arc<dyn SignInAffordance>>,
}

impl std::fmt::Debug for BrokerEmbed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerEmbed")
            .field("config", &self.config)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl BrokerEmbed {
    pub fn new(config: BrokerConfig, store: Arc<dyn KvStore>, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            store,
            network,
            connector: None,
            affordance: None,
        }
    }

    pub fn with_connector(mut self, connector: NetworkConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_affordance(mut self, affordance: Arc<dyn SignInAffordance>) -> Self {
        self.affordance = Some(affordance);
        self
    }
}

#[async_trait]
impl Embed for BrokerEmbed {
    async fn create(
        &self,
        bus: &MessageBus,
        host: ContextId,
    ) -> Result<Box<dyn EmbedHandle>, FacadeError> {
        let endpoint = bus.connect(self.config.broker_origin.clone());
        let context = endpoint.id();
        let mut broker = AuthorityBroker::new(
            self.config.clone(),
            endpoint,
            self.store.clone(),
            self.network.clone(),
        )
        .with_embedder(host);
        if let Some(connector) = &self.connector {
            broker = broker.with_connector(connector.clone());
        }
        if let Some(affordance) = &self.affordance {
            broker = broker.with_affordance(affordance.clone());
        }

        tracing::debug!(broker = %context, embed_url = %self.config.embed_url(), "embedding broker");
        let task = tokio::spawn(broker.run());
        Ok(Box::new(BrokerEmbedHandle {
            context,
            task: Some(task),
        }))
    }
}

#[derive(Debug)]
struct BrokerEmbedHandle {
    context: ContextId,
    task: Option<JoinHandle<()>>,
}

impl EmbedHandle for BrokerEmbedHandle {
    fn context(&self) -> ContextId {
        self.context
    }

    fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(broker = %self.context, "detached broker");
        }
    }
}

impl Drop for BrokerEmbedHandle {
    fn drop(&mut self) {
        self.detach();
    }
}
