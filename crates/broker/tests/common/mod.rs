//! Shared harness wiring a host facade, an embedded broker and an
//! authentication context over one in-memory bus
#![allow(dead_code)]

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use broker::bus::{ContextId, MessageBus};
use broker::config::{BrokerConfig, FacadeConfig};
use broker::establisher::{PostageGrant, SessionEstablisher};
use broker::facade::{BrokerEmbed, Embed, EmbedHandle, FacadeError, HostFacade};
use ::common::crypto::SecretKey;
use ::common::network::InMemoryNetwork;
use ::common::postage::BatchId;
use ::common::progress::{Progress, ProgressCallback};
use ::common::store::MemoryStore;

pub const BROKER_ORIGIN: &str = "https://id.swarm.test";
pub const APP_ORIGIN: &str = "https://app.example";

pub fn batch_id() -> BatchId {
    BatchId::from([0x42; 32])
}

pub fn broker_config() -> BrokerConfig {
    BrokerConfig {
        broker_origin: BROKER_ORIGIN.to_string(),
        ..Default::default()
    }
}

pub fn facade_config() -> FacadeConfig {
    FacadeConfig {
        broker_origin: BROKER_ORIGIN.to_string(),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub struct Harness {
    pub bus: MessageBus,
    pub store: MemoryStore,
    pub network: InMemoryNetwork,
    pub embed: BrokerEmbed,
}

pub fn setup_harness() -> Harness {
    setup_with(broker_config(), InMemoryNetwork::new())
}

pub fn setup_with(config: BrokerConfig, network: InMemoryNetwork) -> Harness {
    let store = MemoryStore::new();
    let embed = BrokerEmbed::new(config, Arc::new(store.clone()), Arc::new(network.clone()));
    Harness {
        bus: MessageBus::new(),
        store,
        network,
        embed,
    }
}

impl Harness {
    pub async fn facade(&self) -> HostFacade {
        self.facade_for(APP_ORIGIN).await.unwrap()
    }

    pub async fn facade_for(&self, origin: &str) -> Result<HostFacade, FacadeError> {
        HostFacade::connect(&self.bus, origin, &self.embed, facade_config()).await
    }

    /// Authentication context sharing the broker's store
    pub async fn establisher(&self) -> SessionEstablisher {
        let establisher =
            SessionEstablisher::new(self.bus.connect(BROKER_ORIGIN), Arc::new(self.store.clone()));
        establisher.master_key_or_generate().await.unwrap();
        establisher
    }

    /// Sign `facade` in with `grant` and wait until the broker agrees
    pub async fn sign_in(&self, facade: &HostFacade, grant: PostageGrant) {
        self.establisher()
            .await
            .establish(facade.broker_context(), APP_ORIGIN, grant)
            .await
            .unwrap();
        assert!(facade.check_auth().await.unwrap());
    }
}

pub fn delegated_grant() -> PostageGrant {
    PostageGrant {
        batch_id: Some(batch_id()),
        ..Default::default()
    }
}

pub fn self_signed_grant(depth: u8) -> (PostageGrant, SecretKey) {
    let key = SecretKey::generate();
    let grant = PostageGrant {
        batch_id: Some(batch_id()),
        signer_key: Some(key.clone()),
        depth: Some(depth),
    };
    (grant, key)
}

/// Progress callback recording every report
pub fn recorder() -> (ProgressCallback, Arc<StdMutex<Vec<Progress>>>) {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |p: Progress| sink.lock().unwrap().push(p));
    (callback, seen)
}

/// Embed whose broker side is driven by the test itself
///
/// `create` reports the host context on `hosts` and hands back `context`,
/// an endpoint the test holds and answers from.
pub struct ScriptedEmbed {
    pub context: ContextId,
    pub hosts: flume::Sender<ContextId>,
}

#[derive(Debug)]
struct ScriptedHandle {
    context: ContextId,
}

impl EmbedHandle for ScriptedHandle {
    fn context(&self) -> ContextId {
        self.context
    }

    fn detach(&mut self) {}
}

#[async_trait]
impl Embed for ScriptedEmbed {
    async fn create(
        &self,
        _bus: &MessageBus,
        host: ContextId,
    ) -> Result<Box<dyn EmbedHandle>, FacadeError> {
        self.hosts
            .send(host)
            .map_err(|e| FacadeError::Embed(e.to_string()))?;
        Ok(Box::new(ScriptedHandle {
            context: self.context,
        }))
    }
}
