//! Host facade
//!
//! The API a host application uses. Each call becomes a request message to
//! the embedded broker, correlated by a fresh id. The facade owns the only
//! table of outstanding requests: a reply resolves and removes its entry, a
//! timeout rejects and removes it, and [`HostFacade::destroy`] rejects
//! everything still waiting.

mod embed;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use common::chunk::{Reference, CHUNK_SIZE};
use common::progress::{Progress, ProgressCallback};

use crate::bus::{BusError, ContextId, Endpoint, MessageBus, Poster};
use crate::config::FacadeConfig;
use crate::messages::{BrokerMessage, HostRequest, UploadDataRequestOptions};

pub use embed::{BrokerEmbed, Embed, EmbedHandle};

#[derive(Debug, Clone, thiserror::Error)]
pub enum FacadeError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("timed out waiting for {what} after {after:?}")]
    Timeout { what: String, after: Duration },
    #[error("broker failed to initialize: {0}")]
    InitError(String),
    #[error("{0}")]
    Broker(String),
    #[error("unexpected {0} from broker")]
    UnexpectedResponse(String),
    #[error("bus error: {0}")]
    Bus(String),
    #[error("failed to embed broker: {0}")]
    Embed(String),
    #[error("facade destroyed")]
    Destroyed,
}

impl From<BusError> for FacadeError {
    fn from(e: BusError) -> Self {
        FacadeError::Bus(e.to_string())
    }
}

/// Where an upload ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    pub reference: Reference,
    pub tag_uid: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub name: Option<String>,
    pub data: Vec<u8>,
}

struct Pending {
    tx: oneshot::Sender<Result<BrokerMessage, FacadeError>>,
    progress: Option<ProgressCallback>,
}

struct Shared {
    pending: Mutex<HashMap<String, Pending>>,
    auth: watch::Sender<bool>,
}

impl Shared {
    fn complete(&self, request_id: &str, result: Result<BrokerMessage, FacadeError>) {
        let Some(pending) = self.pending.lock().remove(request_id) else {
            tracing::debug!(%request_id, "reply for unknown or expired request");
            return;
        };
        // The caller may have given up already
        let _ = pending.tx.send(result);
    }

    fn dispatch(&self, message: BrokerMessage, setup: &flume::Sender<BrokerMessage>) {
        match message {
            BrokerMessage::Initialized | BrokerMessage::InitError { .. } => {
                let _ = setup.send(message);
            }
            BrokerMessage::Ready { authenticated, .. } => {
                self.auth.send_replace(authenticated);
                let _ = setup.send(message);
            }
            BrokerMessage::AuthSuccess { authenticated, origin } => {
                tracing::info!(%origin, "authenticated with broker");
                self.auth.send_replace(authenticated);
            }
            BrokerMessage::Progress {
                request_id,
                processed,
                total,
            } => {
                let callback = self
                    .pending
                    .lock()
                    .get(&request_id)
                    .and_then(|pending| pending.progress.clone());
                if let Some(callback) = callback {
                    callback(Progress { processed, total });
                }
            }
            BrokerMessage::Error {
                request_id: Some(request_id),
                error,
            } => self.complete(&request_id, Err(FacadeError::Broker(error))),
            BrokerMessage::Error {
                request_id: None,
                error,
            } => tracing::warn!("broker reported an error: {}", error),
            response => {
                match &response {
                    BrokerMessage::AuthStatusResponse { authenticated, .. } => {
                        self.auth.send_replace(*authenticated);
                    }
                    BrokerMessage::DisconnectResponse { authenticated, .. } => {
                        self.auth.send_replace(*authenticated);
                    }
                    _ => {}
                }
                match response.request_id() {
                    Some(request_id) => {
                        let request_id = request_id.to_string();
                        self.complete(&request_id, Ok(response));
                    }
                    None => tracing::debug!(?response, "ignoring uncorrelated message"),
                }
            }
        }
    }

    fn reject_all(&self, error: FacadeError) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "rejecting pending requests");
        }
        for (_, pending) in pending {
            let _ = pending.tx.send(Err(error.clone()));
        }
    }
}

async fn listen(
    endpoint: Endpoint,
    broker: ContextId,
    broker_origin: String,
    shared: Arc<Shared>,
    setup: flume::Sender<BrokerMessage>,
) {
    while let Ok(envelope) = endpoint.recv().await {
        if envelope.source != broker || envelope.origin != broker_origin {
            tracing::warn!(
                origin = %envelope.origin,
                source = %envelope.source,
                "ignoring message from outside our broker"
            );
            continue;
        }
        match serde_json::from_value::<BrokerMessage>(envelope.payload) {
            Ok(message) => shared.dispatch(message, &setup),
            Err(e) => tracing::warn!("malformed broker message: {}", e),
        }
    }
}

pub struct HostFacade {
    config: FacadeConfig,
    poster: Poster,
    broker: ContextId,
    shared: Arc<Shared>,
    auth: watch::Receiver<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    embed: Mutex<Option<Box<dyn EmbedHandle>>>,
}

impl std::fmt::Debug for HostFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFacade")
            .field("origin", &self.poster.origin())
            .field("broker", &self.broker)
            .field("authenticated", &*self.auth.borrow())
            .finish()
    }
}

impl HostFacade {
    /// Embed a broker for `host_origin` and wait until it is ready
    ///
    /// Setup runs in two phases, each with its own deadline: the embed
    /// signals it is listening, then the broker answers identification
    /// with the current authentication state.
    pub async fn connect(
        bus: &MessageBus,
        host_origin: &str,
        embed: &dyn Embed,
        config: FacadeConfig,
    ) -> Result<Self, FacadeError> {
        let endpoint = bus.connect(host_origin);
        let mut handle = embed.create(bus, endpoint.id()).await?;
        let broker = handle.context();

        let (auth_tx, auth_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            auth: auth_tx,
        });
        let (setup_tx, setup_rx) = flume::unbounded();
        let poster = endpoint.poster();
        let listener = tokio::spawn(listen(
            endpoint,
            broker,
            config.broker_origin.clone(),
            shared.clone(),
            setup_tx,
        ));

        let facade = Self {
            config,
            poster,
            broker,
            shared,
            auth: auth_rx,
            listener: Mutex::new(Some(listener)),
            embed: Mutex::new(None),
        };

        let ready = facade.initialize(&setup_rx).await;
        match ready {
            Ok(authenticated) => {
                *facade.embed.lock() = Some(handle);
                tracing::info!(origin = %host_origin, authenticated, "broker ready");
                Ok(facade)
            }
            Err(e) => {
                handle.detach();
                facade.destroy();
                Err(e)
            }
        }
    }

    async fn initialize(&self, setup: &flume::Receiver<BrokerMessage>) -> Result<bool, FacadeError> {
        let embed_timeout = self.config.embed_timeout;
        tokio::time::timeout(embed_timeout, async {
            loop {
                match setup.recv_async().await {
                    Ok(BrokerMessage::Initialized) => return Ok(()),
                    Ok(BrokerMessage::InitError { error }) => return Err(FacadeError::InitError(error)),
                    Ok(_) => continue,
                    Err(_) => return Err(FacadeError::Destroyed),
                }
            }
        })
        .await
        .map_err(|_| FacadeError::Timeout {
            what: "broker to initialize".to_string(),
            after: embed_timeout,
        })??;

        self.post(&HostRequest::Identify {
            network_url: self.config.network_url.clone(),
        })?;

        let ready_timeout = self.config.ready_timeout;
        tokio::time::timeout(ready_timeout, async {
            loop {
                match setup.recv_async().await {
                    Ok(BrokerMessage::Ready { authenticated, .. }) => return Ok(authenticated),
                    Ok(BrokerMessage::InitError { error }) => return Err(FacadeError::InitError(error)),
                    Ok(_) => continue,
                    Err(_) => return Err(FacadeError::Destroyed),
                }
            }
        })
        .await
        .map_err(|_| FacadeError::Timeout {
            what: "broker to become ready".to_string(),
            after: ready_timeout,
        })?
    }

    /// Context of the embedded broker
    pub fn broker_context(&self) -> ContextId {
        self.broker
    }

    pub fn is_authenticated(&self) -> bool {
        *self.auth.borrow()
    }

    /// Follow authentication changes pushed by the broker
    pub fn auth_changes(&self) -> watch::Receiver<bool> {
        self.auth.clone()
    }

    /// Number of requests waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    fn post(&self, request: &HostRequest) -> Result<(), FacadeError> {
        self.poster
            .post_to_origin(self.broker, &self.config.broker_origin, request)?;
        Ok(())
    }

    async fn request(
        &self,
        build: impl FnOnce(String) -> HostRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<BrokerMessage, FacadeError> {
        if self.listener.lock().is_none() {
            return Err(FacadeError::Destroyed);
        }
        let request_id = Uuid::new_v4().to_string();
        let request = build(request_id.clone());
        let kind = request.kind();

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(request_id.clone(), Pending { tx, progress });
        if let Err(e) = self.post(&request) {
            self.shared.pending.lock().remove(&request_id);
            return Err(e);
        }
        tracing::debug!(%request_id, kind, "sent request");

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FacadeError::Destroyed),
            Err(_) => {
                self.shared.pending.lock().remove(&request_id);
                tracing::warn!(%request_id, kind, "request timed out");
                Err(FacadeError::Timeout {
                    what: kind.to_string(),
                    after: self.config.request_timeout,
                })
            }
        }
    }

    pub async fn check_auth(&self) -> Result<bool, FacadeError> {
        match self
            .request(|request_id| HostRequest::CheckAuth { request_id }, None)
            .await?
        {
            BrokerMessage::AuthStatusResponse { authenticated, .. } => Ok(authenticated),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the broker to offer sign-in. Nothing is sent back.
    pub fn request_auth_ui(&self) -> Result<(), FacadeError> {
        self.post(&HostRequest::RequestAuthUi)
    }

    pub async fn upload_data(
        &self,
        data: Vec<u8>,
        options: UploadDataRequestOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadReceipt, FacadeError> {
        let enable_progress = progress.is_some();
        let response = self
            .request(
                |request_id| HostRequest::UploadData {
                    request_id,
                    data,
                    options,
                    enable_progress,
                },
                progress,
            )
            .await?;
        match response {
            BrokerMessage::UploadDataResponse {
                reference, tag_uid, ..
            } => Ok(UploadReceipt {
                reference: parse_reference(&reference)?,
                tag_uid,
            }),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn download_data(
        &self,
        reference: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<u8>, FacadeError> {
        let reference = parse_reference(reference)?.to_hex();
        let enable_progress = progress.is_some();
        match self
            .request(
                |request_id| HostRequest::DownloadData {
                    request_id,
                    reference,
                    enable_progress,
                },
                progress,
            )
            .await?
        {
            BrokerMessage::DownloadDataResponse { data, .. } => Ok(data),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn upload_file(
        &self,
        data: Vec<u8>,
        name: Option<String>,
        options: UploadDataRequestOptions,
    ) -> Result<UploadReceipt, FacadeError> {
        match self
            .request(
                |request_id| HostRequest::UploadFile {
                    request_id,
                    data,
                    name,
                    options,
                },
                None,
            )
            .await?
        {
            BrokerMessage::UploadFileResponse {
                reference, tag_uid, ..
            } => Ok(UploadReceipt {
                reference: parse_reference(&reference)?,
                tag_uid,
            }),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn download_file(
        &self,
        reference: &str,
        path: Option<String>,
    ) -> Result<DownloadedFile, FacadeError> {
        let reference = parse_reference(reference)?.to_hex();
        match self
            .request(
                |request_id| HostRequest::DownloadFile {
                    request_id,
                    reference,
                    path,
                },
                None,
            )
            .await?
        {
            BrokerMessage::DownloadFileResponse { name, data, .. } => {
                Ok(DownloadedFile { name, data })
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Upload one raw chunk of 1 to 4096 bytes
    pub async fn upload_chunk(
        &self,
        data: Vec<u8>,
        options: UploadDataRequestOptions,
    ) -> Result<Reference, FacadeError> {
        if data.is_empty() || data.len() > CHUNK_SIZE {
            return Err(FacadeError::Validation(format!(
                "chunk of {} bytes, expected 1 to {}",
                data.len(),
                CHUNK_SIZE
            )));
        }
        match self
            .request(
                |request_id| HostRequest::UploadChunk {
                    request_id,
                    data,
                    options,
                },
                None,
            )
            .await?
        {
            BrokerMessage::UploadChunkResponse { reference, .. } => parse_reference(&reference),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn download_chunk(&self, reference: &str) -> Result<Vec<u8>, FacadeError> {
        let reference = parse_reference(reference)?.to_hex();
        match self
            .request(
                |request_id| HostRequest::DownloadChunk {
                    request_id,
                    reference,
                },
                None,
            )
            .await?
        {
            BrokerMessage::DownloadChunkResponse { data, .. } => Ok(data),
            other => Err(unexpected(&other)),
        }
    }

    /// End the session of this host with the broker
    pub async fn disconnect(&self) -> Result<(), FacadeError> {
        match self
            .request(|request_id| HostRequest::Disconnect { request_id }, None)
            .await?
        {
            BrokerMessage::DisconnectResponse { success: true, .. } => Ok(()),
            BrokerMessage::DisconnectResponse { success: false, .. } => {
                Err(FacadeError::Broker("disconnect failed".to_string()))
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Reject every pending request, stop listening and remove the embed
    pub fn destroy(&self) {
        self.shared.reject_all(FacadeError::Destroyed);
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        if let Some(mut embed) = self.embed.lock().take() {
            embed.detach();
        }
    }
}

impl Drop for HostFacade {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn parse_reference(reference: &str) -> Result<Reference, FacadeError> {
    reference
        .parse()
        .map_err(|e: common::chunk::ChunkError| FacadeError::Validation(e.to_string()))
}

fn unexpected(message: &BrokerMessage) -> FacadeError {
    let kind = serde_json::to_value(message)
        .ok()
        .and_then(|value| value.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "message".to_string());
    FacadeError::UnexpectedResponse(kind)
}
