use clap::Args;

use broker::bus::MessageBus;
use broker::config::BrokerConfig;
use broker::establisher::{EstablisherError, SessionEstablisher};
use common::postage::BatchId;

use crate::state::{AppConfig, AppState, PostageConfig, DEFAULT_APP_ORIGIN};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Node API the broker talks to
    #[arg(long, default_value = broker::config::DEFAULT_NETWORK_URL)]
    pub network_url: String,

    /// Origin the CLI identifies as
    #[arg(long, default_value = DEFAULT_APP_ORIGIN)]
    pub app_origin: String,

    /// Postage batch paying for uploads (64 hex characters)
    #[arg(long)]
    pub batch_id: Option<BatchId>,

    /// Depth of the postage batch
    #[arg(long)]
    pub depth: Option<u8>,

    /// Stamp chunks locally instead of letting the node stamp them
    #[arg(long, requires = "batch_id")]
    pub self_signed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
    #[error("failed to create master key: {0}")]
    MasterKey(#[from] EstablisherError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            app_origin: self.app_origin.clone(),
            postage: PostageConfig {
                batch_id: self.batch_id,
                depth: self.depth,
                self_signed: self.self_signed,
            },
            broker: BrokerConfig {
                network_url: self.network_url.clone(),
                ..Default::default()
            },
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        // Master key lives in the authentication context's namespace
        let establisher = SessionEstablisher::new(
            MessageBus::new().connect(state.config.broker.broker_origin.clone()),
            state.store(),
        );
        establisher.master_key_or_generate().await?;

        let batch_str = match state.config.postage.batch_id {
            Some(batch_id) => batch_id.to_hex(),
            None => "none (read-only)".to_string(),
        };

        let output = format!(
            "Initialized swarm-id directory at: {}\n\
             - Store: {}\n\
             - Signer key: {}\n\
             - Config: {}\n\
             - App origin: {}\n\
             - Network: {}\n\
             - Postage batch: {}\n\
             - Self-signed: {}",
            state.app_dir.display(),
            state.store_path.display(),
            state.key_path.display(),
            state.config_path.display(),
            state.config.app_origin,
            state.config.broker.network_url,
            batch_str,
            state.config.postage.self_signed
        );

        Ok(output)
    }
}
