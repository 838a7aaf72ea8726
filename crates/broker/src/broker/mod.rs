//! The authority broker
//!
//! The broker is the trusted context that holds session material on behalf
//! of a host application. It runs one message at a time off its bus
//! endpoint and moves through three states:
//!
//! - **Unidentified**: only `identify` is honored. The first one pins the
//!   sender's origin for the lifetime of the broker.
//! - **Identified**: requests from the pinned origin are served, and
//!   `setSecret` from the broker's own origin establishes a session. The
//!   session, if any, decides whether storage calls are authorized.
//! - **Rejected**: the first identify came from an origin outside the
//!   allow-list. Nothing is served.
//!
//! Storage calls run on spawned tasks so a long upload never blocks a
//! `checkAuth` arriving behind it.

mod handlers;

use std::sync::Arc;

use url::Url;

use common::chunk::ChunkError;
use common::download::{DownloadAssembler, DownloadError};
use common::network::{HttpNetwork, Network, NetworkError};
use common::store::KvStore;
use common::upload::{UploadAuth, UploadError, UploadOrchestrator};

use crate::affordance::{NoopAffordance, SignInAffordance};
use crate::bus::{BusError, ContextId, Endpoint, Envelope, Poster};
use crate::config::{BrokerConfig, ConfigError};
use crate::messages::{
    raw_request_id, AuthMessage, AuthReply, BrokerMessage, HostRequest, Inbound, SecretBundle,
};
use crate::session::{SessionError, SessionRecord};

/// Builds a network capability for a node API url
pub type NetworkConnector =
    Arc<dyn Fn(&Url) -> Result<Arc<dyn Network>, NetworkError> + Send + Sync>;

/// Connector talking to a Bee-compatible HTTP API
pub fn http_connector() -> NetworkConnector {
    Arc::new(|url: &Url| Ok(Arc::new(HttpNetwork::new(url)?) as Arc<dyn Network>))
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Not authenticated. Please login first.")]
    NotAuthenticated,
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{0}")]
    Upload(#[from] UploadError),
    #[error("{0}")]
    Download(#[from] DownloadError),
    #[error("{0}")]
    Network(#[from] NetworkError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ChunkError> for BrokerError {
    fn from(e: ChunkError) -> Self {
        BrokerError::Validation(e.to_string())
    }
}

/// An authenticated session and the uploads it may pay for
#[derive(Debug)]
pub(crate) struct ActiveSession {
    pub(crate) record: SessionRecord,
    pub(crate) auth: Option<UploadAuth>,
}

#[derive(Debug)]
pub struct Identified {
    host_origin: String,
    host: ContextId,
    session: Option<Arc<ActiveSession>>,
}

impl Identified {
    pub fn host_origin(&self) -> &str {
        &self.host_origin
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

#[derive(Debug)]
pub enum BrokerState {
    Unidentified,
    Identified(Identified),
    Rejected { origin: String },
}

/// Network facing services shared with request tasks
#[derive(Debug)]
pub(crate) struct Services {
    pub(crate) network: Arc<dyn Network>,
    pub(crate) uploader: UploadOrchestrator,
    pub(crate) downloader: DownloadAssembler,
}

impl Services {
    fn new(network: Arc<dyn Network>, store: Arc<dyn KvStore>) -> Self {
        Self {
            uploader: UploadOrchestrator::new(network.clone(), store),
            downloader: DownloadAssembler::new(network.clone()),
            network,
        }
    }
}

/// Replies a `Responder` can deliver
pub(crate) trait Reply: serde::Serialize {
    fn request_id(&self) -> Option<&str>;
}

impl Reply for BrokerMessage {
    fn request_id(&self) -> Option<&str> {
        BrokerMessage::request_id(self)
    }
}

impl Reply for AuthReply {
    fn request_id(&self) -> Option<&str> {
        None
    }
}

/// Posts replies back to the context a request came from
#[derive(Debug, Clone)]
pub(crate) struct Responder {
    poster: Poster,
    target: ContextId,
    origin: String,
}

impl Responder {
    pub(crate) fn send<M: Reply>(&self, message: &M) {
        if let Err(e) = self
            .poster
            .post_to_origin(self.target, &self.origin, message)
        {
            tracing::warn!(
                origin = %self.origin,
                request_id = ?message.request_id(),
                "failed to deliver reply: {}",
                e
            );
        }
    }

    pub(crate) fn error(&self, request_id: Option<String>, error: impl ToString) {
        self.send(&BrokerMessage::Error {
            request_id,
            error: error.to_string(),
        });
    }
}

pub struct AuthorityBroker {
    config: BrokerConfig,
    endpoint: Endpoint,
    store: Arc<dyn KvStore>,
    connector: NetworkConnector,
    services: Arc<Services>,
    affordance: Arc<dyn SignInAffordance>,
    embedder: Option<ContextId>,
    state: BrokerState,
}

impl std::fmt::Debug for AuthorityBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityBroker")
            .field("origin", &self.endpoint.origin())
            .field("state", &self.state)
            .finish()
    }
}

impl AuthorityBroker {
    /// Create a broker on `endpoint`, talking to the node at `network`
    pub fn new(
        config: BrokerConfig,
        endpoint: Endpoint,
        store: Arc<dyn KvStore>,
        network: Arc<dyn Network>,
    ) -> Self {
        if endpoint.origin() != config.broker_origin {
            tracing::warn!(
                endpoint_origin = %endpoint.origin(),
                broker_origin = %config.broker_origin,
                "broker endpoint does not run under the configured broker origin"
            );
        }
        Self {
            services: Arc::new(Services::new(network, store.clone())),
            config,
            endpoint,
            store,
            connector: http_connector(),
            affordance: Arc::new(NoopAffordance),
            embedder: None,
            state: BrokerState::Unidentified,
        }
    }

    /// Replace how network url overrides from identify are connected
    pub fn with_connector(mut self, connector: NetworkConnector) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_affordance(mut self, affordance: Arc<dyn SignInAffordance>) -> Self {
        self.affordance = affordance;
        self
    }

    /// Context embedding this broker, told `initialized` once we listen
    pub fn with_embedder(mut self, embedder: ContextId) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn id(&self) -> ContextId {
        self.endpoint.id()
    }

    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    /// Serve messages until the bus goes away
    pub async fn run(mut self) {
        if let Some(embedder) = self.embedder {
            if let Err(e) = self.endpoint.post(embedder, &BrokerMessage::Initialized) {
                tracing::error!("failed to signal initialization: {}", e);
            }
        }
        tracing::info!(origin = %self.endpoint.origin(), "broker listening");

        while let Ok(envelope) = self.endpoint.recv().await {
            self.handle(envelope).await;
        }
        tracing::info!("broker endpoint closed, shutting down");
    }

    /// Dispatch one inbound message
    pub async fn handle(&mut self, envelope: Envelope) {
        let message = match serde_json::from_value::<Inbound>(envelope.payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                self.reject_malformed(&envelope, e);
                return;
            }
        };

        match message {
            Inbound::Host(HostRequest::Identify { network_url }) => {
                self.identify(&envelope, network_url).await
            }
            Inbound::Host(request) => self.host_request(&envelope, request).await,
            Inbound::Auth(AuthMessage::SetSecret { app_origin, data }) => {
                self.set_secret(&envelope, app_origin, data).await
            }
        }
    }

    fn responder(&self, envelope: &Envelope) -> Responder {
        Responder {
            poster: self.endpoint.poster(),
            target: envelope.source,
            origin: envelope.origin.clone(),
        }
    }

    fn reject_malformed(&self, envelope: &Envelope, error: serde_json::Error) {
        let trusted = match &self.state {
            BrokerState::Identified(identified) => envelope.origin == identified.host_origin,
            _ => false,
        };
        tracing::warn!(origin = %envelope.origin, "malformed message: {}", error);
        // Only the pinned host hears about its own mistakes
        if trusted {
            self.responder(envelope).error(
                raw_request_id(&envelope.payload),
                BrokerError::Protocol(format!("malformed message: {}", error)),
            );
        }
    }

    async fn identify(&mut self, envelope: &Envelope, network_url: Option<String>) {
        let origin = envelope.origin.as_str();
        match &self.state {
            BrokerState::Unidentified => {}
            BrokerState::Identified(identified) if identified.host_origin == origin => {
                tracing::debug!(%origin, "repeated identify from pinned origin");
                self.responder(envelope).send(&BrokerMessage::Ready {
                    authenticated: identified.is_authenticated(),
                    host_origin: identified.host_origin.clone(),
                });
                return;
            }
            BrokerState::Identified(identified) => {
                tracing::error!(
                    %origin,
                    pinned = %identified.host_origin,
                    "identify from a different origin ignored, origin is already pinned"
                );
                return;
            }
            BrokerState::Rejected { .. } => {
                tracing::warn!(%origin, "identify ignored, broker rejected its host");
                return;
            }
        }

        let responder = self.responder(envelope);
        if !self.config.is_allowed(origin) {
            tracing::error!(%origin, "host origin is not in the allow-list");
            responder.send(&BrokerMessage::InitError {
                error: format!("origin {} is not allowed", origin),
            });
            self.state = BrokerState::Rejected {
                origin: origin.to_string(),
            };
            return;
        }

        if let Some(url) = network_url {
            if let Err(e) = self.connect(&url) {
                tracing::error!(%origin, network_url = %url, "failed to use network url: {}", e);
                responder.send(&BrokerMessage::InitError {
                    error: e.to_string(),
                });
                self.state = BrokerState::Rejected {
                    origin: origin.to_string(),
                };
                return;
            }
        }

        let session = match self.restore_session(origin).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(%origin, "failed to restore session: {}", e);
                None
            }
        };
        let authenticated = session.is_some();
        self.state = BrokerState::Identified(Identified {
            host_origin: origin.to_string(),
            host: envelope.source,
            session,
        });
        tracing::info!(%origin, authenticated, "host origin pinned");
        responder.send(&BrokerMessage::Ready {
            authenticated,
            host_origin: origin.to_string(),
        });
    }

    fn connect(&mut self, url: &str) -> Result<(), BrokerError> {
        let url = Url::parse(url).map_err(ConfigError::from)?;
        let network = (self.connector)(&url)?;
        self.services = Arc::new(Services::new(network, self.store.clone()));
        tracing::info!(network_url = %url, "using host supplied network url");
        Ok(())
    }

    async fn restore_session(
        &self,
        origin: &str,
    ) -> Result<Option<Arc<ActiveSession>>, BrokerError> {
        let Some(record) = SessionRecord::load(self.store.as_ref(), origin).await? else {
            return Ok(None);
        };
        let auth = record
            .upload_auth(self.store.as_ref(), self.config.default_depth)
            .await?;
        tracing::debug!(%origin, can_upload = auth.is_some(), "restored session");
        Ok(Some(Arc::new(ActiveSession { record, auth })))
    }

    async fn host_request(&mut self, envelope: &Envelope, request: HostRequest) {
        let BrokerState::Identified(identified) = &mut self.state else {
            tracing::debug!(
                origin = %envelope.origin,
                kind = request.kind(),
                "ignoring request before a host origin is pinned"
            );
            return;
        };
        if envelope.origin != identified.host_origin {
            tracing::warn!(
                origin = %envelope.origin,
                pinned = %identified.host_origin,
                kind = request.kind(),
                "rejected request from unpinned origin"
            );
            return;
        }

        let responder = Responder {
            poster: self.endpoint.poster(),
            target: envelope.source,
            origin: envelope.origin.clone(),
        };
        match request {
            HostRequest::CheckAuth { request_id } => {
                responder.send(&BrokerMessage::AuthStatusResponse {
                    request_id,
                    authenticated: identified.is_authenticated(),
                    origin: Some(identified.host_origin.clone()),
                });
            }
            HostRequest::RequestAuthUi => {
                if identified.is_authenticated() {
                    tracing::debug!(origin = %identified.host_origin, "already authenticated");
                } else {
                    self.affordance.present(&identified.host_origin).await;
                }
            }
            HostRequest::Disconnect { request_id } => {
                match SessionRecord::delete(self.store.as_ref(), &identified.host_origin).await {
                    Ok(()) => {
                        identified.session = None;
                        tracing::info!(origin = %identified.host_origin, "session disconnected");
                        responder.send(&BrokerMessage::DisconnectResponse {
                            request_id,
                            success: true,
                            authenticated: false,
                        });
                    }
                    Err(e) => responder.error(Some(request_id), BrokerError::from(e)),
                }
            }
            request => {
                let Some(session) = identified.session.clone() else {
                    responder.error(
                        request.request_id().map(str::to_string),
                        BrokerError::NotAuthenticated,
                    );
                    return;
                };
                let services = self.services.clone();
                tokio::spawn(handlers::serve(services, session, responder, request));
            }
        }
    }

    async fn set_secret(&mut self, envelope: &Envelope, app_origin: String, bundle: SecretBundle) {
        let responder = self.responder(envelope);
        if envelope.origin != self.config.broker_origin {
            tracing::warn!(
                origin = %envelope.origin,
                "rejected set-secret from outside the broker origin"
            );
            return;
        }
        let BrokerState::Identified(identified) = &mut self.state else {
            tracing::warn!(%app_origin, "set-secret before a host origin is pinned");
            responder.send(&AuthReply::SecretReceived { success: false });
            return;
        };

        if app_origin != identified.host_origin {
            if self.config.strict_secret_origin {
                tracing::warn!(
                    %app_origin,
                    pinned = %identified.host_origin,
                    "rejected secret asserted for another origin"
                );
                responder.send(&AuthReply::SecretReceived { success: false });
                return;
            }
            tracing::warn!(
                %app_origin,
                pinned = %identified.host_origin,
                "secret asserted for another origin, accepting for the pinned origin"
            );
        }

        let host_origin = identified.host_origin.clone();
        let session = match establish(
            self.store.as_ref(),
            &host_origin,
            bundle,
            self.config.default_depth,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(origin = %host_origin, "failed to establish session: {}", e);
                responder.send(&AuthReply::SecretReceived { success: false });
                return;
            }
        };

        identified.session = Some(Arc::new(session));
        tracing::info!(origin = %host_origin, "session established");
        responder.send(&AuthReply::SecretReceived { success: true });

        let notify = self.endpoint.poster().post_to_origin(
            identified.host,
            &host_origin,
            &BrokerMessage::AuthSuccess {
                authenticated: true,
                origin: host_origin.clone(),
            },
        );
        if let Err(e) = notify {
            tracing::warn!(origin = %host_origin, "failed to notify host: {}", e);
        }
    }
}

async fn establish(
    store: &dyn KvStore,
    host_origin: &str,
    bundle: SecretBundle,
    default_depth: u8,
) -> Result<ActiveSession, BrokerError> {
    let record = SessionRecord::from_bundle(host_origin, bundle)?;
    let auth = record.upload_auth(store, default_depth).await?;
    record.save(store).await?;
    Ok(ActiveSession { record, auth })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::MessageBus;
    use common::network::InMemoryNetwork;
    use common::store::MemoryStore;
    use serde_json::json;

    const BROKER: &str = "https://id.example";
    const APP: &str = "https://app.example";

    fn broker(bus: &MessageBus, config: BrokerConfig) -> AuthorityBroker {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let network: Arc<dyn Network> = Arc::new(InMemoryNetwork::new());
        AuthorityBroker::new(config, bus.connect(BROKER), store, network)
    }

    fn config() -> BrokerConfig {
        BrokerConfig {
            broker_origin: BROKER.to_string(),
            ..Default::default()
        }
    }

    fn envelope(origin: &str, source: &Endpoint, payload: serde_json::Value) -> Envelope {
        Envelope {
            origin: origin.to_string(),
            source: source.id(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_first_identify_pins_origin() {
        let bus = MessageBus::new();
        let mut broker = broker(&bus, config());
        let host = bus.connect(APP);
        let intruder = bus.connect("https://evil.example");

        broker
            .handle(envelope(APP, &host, json!({"type": "identify"})))
            .await;
        let ready: BrokerMessage = serde_json::from_value(host.recv().await.unwrap().payload).unwrap();
        assert_eq!(
            ready,
            BrokerMessage::Ready {
                authenticated: false,
                host_origin: APP.to_string()
            }
        );

        broker
            .handle(envelope(
                "https://evil.example",
                &intruder,
                json!({"type": "identify"}),
            ))
            .await;
        match broker.state() {
            BrokerState::Identified(identified) => assert_eq!(identified.host_origin(), APP),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_auth_ui_before_identify_is_noop() {
        let bus = MessageBus::new();
        let mut broker = broker(&bus, config());
        let host = bus.connect(APP);

        broker
            .handle(envelope(APP, &host, json!({"type": "requestAuthUi"})))
            .await;
        assert!(matches!(broker.state(), BrokerState::Unidentified));
    }

    #[tokio::test]
    async fn test_allow_list_rejects_origin() {
        let bus = MessageBus::new();
        let mut broker = broker(
            &bus,
            BrokerConfig {
                allowed_origins: vec!["https://other.example".to_string()],
                ..config()
            },
        );
        let host = bus.connect(APP);

        broker
            .handle(envelope(APP, &host, json!({"type": "identify"})))
            .await;
        let reply: BrokerMessage = serde_json::from_value(host.recv().await.unwrap().payload).unwrap();
        assert!(matches!(reply, BrokerMessage::InitError { .. }));
        assert!(matches!(broker.state(), BrokerState::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_invalid_network_url_is_init_error() {
        let bus = MessageBus::new();
        let mut broker = broker(&bus, config());
        let host = bus.connect(APP);

        broker
            .handle(envelope(
                APP,
                &host,
                json!({"type": "identify", "networkUrl": "not a url"}),
            ))
            .await;
        let reply: BrokerMessage = serde_json::from_value(host.recv().await.unwrap().payload).unwrap();
        assert!(matches!(reply, BrokerMessage::InitError { .. }));
    }

    #[tokio::test]
    async fn test_unauthenticated_storage_call_is_rejected() {
        let bus = MessageBus::new();
        let mut broker = broker(&bus, config());
        let host = bus.connect(APP);

        broker
            .handle(envelope(APP, &host, json!({"type": "identify"})))
            .await;
        host.recv().await.unwrap();

        broker
            .handle(envelope(
                APP,
                &host,
                json!({"type": "downloadData", "requestId": "r1", "reference": "00"}),
            ))
            .await;
        let reply: BrokerMessage = serde_json::from_value(host.recv().await.unwrap().payload).unwrap();
        assert_eq!(
            reply,
            BrokerMessage::Error {
                request_id: Some("r1".to_string()),
                error: "Not authenticated. Please login first.".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_message_reports_error_to_host() {
        let bus = MessageBus::new();
        let mut broker = broker(&bus, config());
        let host = bus.connect(APP);

        broker
            .handle(envelope(APP, &host, json!({"type": "identify"})))
            .await;
        host.recv().await.unwrap();

        broker
            .handle(envelope(
                APP,
                &host,
                json!({"type": "launchMissiles", "requestId": "r7"}),
            ))
            .await;
        let reply: BrokerMessage = serde_json::from_value(host.recv().await.unwrap().payload).unwrap();
        assert!(matches!(
            reply,
            BrokerMessage::Error { request_id: Some(id), .. } if id == "r7"
        ));
    }
}
