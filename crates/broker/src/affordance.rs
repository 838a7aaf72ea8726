//! Sign-in affordance
//!
//! When the pinned origin has no session the broker asks its embedder to
//! show some way of signing in. What that looks like is up to the embedder.

use async_trait::async_trait;

#[async_trait]
pub trait SignInAffordance: Send + Sync + std::fmt::Debug {
    /// Offer sign-in to the user of `host_origin`
    async fn present(&self, host_origin: &str);
}

/// Does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAffordance;

#[async_trait]
impl SignInAffordance for NoopAffordance {
    async fn present(&self, host_origin: &str) {
        tracing::debug!(origin = %host_origin, "sign-in requested, no affordance configured");
    }
}

/// Forwards each request on a channel, for embedders that drive sign-in
/// from their own task
#[derive(Debug, Clone)]
pub struct ChannelAffordance {
    tx: flume::Sender<String>,
}

impl ChannelAffordance {
    pub fn new() -> (Self, flume::Receiver<String>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SignInAffordance for ChannelAffordance {
    async fn present(&self, host_origin: &str) {
        if self.tx.send_async(host_origin.to_string()).await.is_err() {
            tracing::warn!(origin = %host_origin, "sign-in affordance receiver dropped");
        }
    }
}
