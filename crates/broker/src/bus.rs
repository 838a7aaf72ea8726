//! In-process message bus between execution contexts
//!
//! Every context connects with the origin it runs under and gets an
//! [`Endpoint`]. Messages carry the sender's origin and context id, both
//! filled in by the bus from the sending endpoint. Nothing in a payload can
//! change them, so receivers can trust `origin` the way a browser lets a
//! frame trust the origin of a posted message.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("context {0} is not connected")]
    UnknownContext(ContextId),
    #[error("context {target} runs under {actual}, not {expected}")]
    OriginMismatch {
        target: ContextId,
        expected: String,
        actual: String,
    },
    #[error("bus disconnected")]
    Disconnected,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Identity of a connected context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A delivered message
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Origin of the sending context, set by the bus
    pub origin: String,
    /// Sending context, set by the bus
    pub source: ContextId,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
struct Route {
    origin: String,
    tx: flume::Sender<Envelope>,
}

#[derive(Debug, Default)]
struct BusInner {
    next_id: u64,
    routes: HashMap<ContextId, Route>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new context running under `origin`
    pub fn connect(&self, origin: impl Into<String>) -> Endpoint {
        let origin = origin.into();
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ContextId(inner.next_id);
        inner.routes.insert(
            id,
            Route {
                origin: origin.clone(),
                tx,
            },
        );
        tracing::debug!(context = %id, %origin, "context connected");
        Endpoint {
            poster: Poster {
                id,
                origin,
                bus: self.clone(),
            },
            rx,
        }
    }

    /// Origin a context runs under
    pub fn origin_of(&self, id: ContextId) -> Option<String> {
        self.inner.lock().routes.get(&id).map(|r| r.origin.clone())
    }

    fn disconnect(&self, id: ContextId) {
        if self.inner.lock().routes.remove(&id).is_some() {
            tracing::debug!(context = %id, "context disconnected");
        }
    }

    fn deliver(
        &self,
        from: &Poster,
        target: ContextId,
        target_origin: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<(), BusError> {
        let inner = self.inner.lock();
        let route = inner
            .routes
            .get(&target)
            .ok_or(BusError::UnknownContext(target))?;
        if let Some(expected) = target_origin {
            if route.origin != expected {
                return Err(BusError::OriginMismatch {
                    target,
                    expected: expected.to_string(),
                    actual: route.origin.clone(),
                });
            }
        }
        route
            .tx
            .send(Envelope {
                origin: from.origin.clone(),
                source: from.id,
                payload,
            })
            .map_err(|_| BusError::Disconnected)
    }
}

/// Cloneable sending half of an endpoint
#[derive(Debug, Clone)]
pub struct Poster {
    id: ContextId,
    origin: String,
    bus: MessageBus,
}

impl Poster {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Send `message` to `target`
    pub fn post<T: Serialize>(&self, target: ContextId, message: &T) -> Result<(), BusError> {
        self.bus
            .deliver(self, target, None, serde_json::to_value(message)?)
    }

    /// Send `message` to `target` only if it runs under `target_origin`
    pub fn post_to_origin<T: Serialize>(
        &self,
        target: ContextId,
        target_origin: &str,
        message: &T,
    ) -> Result<(), BusError> {
        self.bus.deliver(
            self,
            target,
            Some(target_origin),
            serde_json::to_value(message)?,
        )
    }

    /// Send an already encoded payload
    pub fn post_raw(&self, target: ContextId, payload: serde_json::Value) -> Result<(), BusError> {
        self.bus.deliver(self, target, None, payload)
    }
}

/// A context's connection to the bus. Disconnects when dropped.
#[derive(Debug)]
pub struct Endpoint {
    poster: Poster,
    rx: flume::Receiver<Envelope>,
}

impl Endpoint {
    pub fn id(&self) -> ContextId {
        self.poster.id
    }

    pub fn origin(&self) -> &str {
        &self.poster.origin
    }

    pub fn poster(&self) -> Poster {
        self.poster.clone()
    }

    pub fn post<T: Serialize>(&self, target: ContextId, message: &T) -> Result<(), BusError> {
        self.poster.post(target, message)
    }

    /// Wait for the next inbound message
    pub async fn recv(&self) -> Result<Envelope, BusError> {
        self.rx.recv_async().await.map_err(|_| BusError::Disconnected)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.poster.bus.disconnect(self.poster.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_origin_is_stamped_by_bus() {
        let bus = MessageBus::new();
        let host = bus.connect("https://app.example");
        let broker = bus.connect("https://id.example");

        // A payload claiming another origin changes nothing
        host.post(broker.id(), &json!({"type": "identify", "origin": "https://evil.example"}))
            .unwrap();
        let envelope = broker.recv().await.unwrap();
        assert_eq!(envelope.origin, "https://app.example");
        assert_eq!(envelope.source, host.id());
        assert_eq!(envelope.payload["origin"], "https://evil.example");
    }

    #[tokio::test]
    async fn test_target_origin_is_enforced() {
        let bus = MessageBus::new();
        let host = bus.connect("https://app.example");
        let broker = bus.connect("https://id.example");

        let poster = broker.poster();
        assert!(poster
            .post_to_origin(host.id(), "https://app.example", &json!({}))
            .is_ok());
        assert!(matches!(
            poster.post_to_origin(host.id(), "https://other.example", &json!({})),
            Err(BusError::OriginMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_endpoint_is_unreachable() {
        let bus = MessageBus::new();
        let host = bus.connect("https://app.example");
        let broker = bus.connect("https://id.example");
        let broker_id = broker.id();
        drop(broker);

        assert!(matches!(
            host.post(broker_id, &json!({})),
            Err(BusError::UnknownContext(_))
        ));
        assert!(bus.origin_of(broker_id).is_none());
    }
}
