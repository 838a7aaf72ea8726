use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NETWORK_URL: &str = "http://localhost:1633";
pub const DEFAULT_EMBED_PATH: &str = "/proxy";
pub const DEFAULT_DEPTH: u8 = 23;
pub const DEFAULT_BROKER_ORIGIN: &str = "https://id.swarm.local";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid network url: {0}")]
    NetworkUrl(#[from] url::ParseError),
}

/// Settings of the broker context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Node API the broker talks to unless the host overrides it on identify
    #[serde(default = "default_network_url")]
    pub network_url: String,
    /// Host origins allowed to pin the broker. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Path the broker is served from, relative to its origin
    #[serde(default = "default_embed_path")]
    pub embed_path: String,
    /// Batch depth assumed for self-signed uploads
    #[serde(default = "default_depth")]
    pub default_depth: u8,
    /// Origin the broker and authentication contexts run under
    #[serde(default = "default_broker_origin")]
    pub broker_origin: String,
    /// Reject secrets asserted for an origin other than the pinned host
    #[serde(default)]
    pub strict_secret_origin: bool,
}

fn default_network_url() -> String {
    DEFAULT_NETWORK_URL.to_string()
}

fn default_embed_path() -> String {
    DEFAULT_EMBED_PATH.to_string()
}

fn default_depth() -> u8 {
    DEFAULT_DEPTH
}

fn default_broker_origin() -> String {
    DEFAULT_BROKER_ORIGIN.to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            network_url: default_network_url(),
            allowed_origins: Vec::new(),
            embed_path: default_embed_path(),
            default_depth: default_depth(),
            broker_origin: default_broker_origin(),
            strict_secret_origin: false,
        }
    }
}

impl BrokerConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn network_url(&self) -> Result<url::Url, ConfigError> {
        Ok(url::Url::parse(&self.network_url)?)
    }

    /// Whether `origin` may pin this broker
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == origin)
    }

    /// Full location of the embedded broker
    pub fn embed_url(&self) -> String {
        format!(
            "{}{}",
            self.broker_origin.trim_end_matches('/'),
            self.embed_path
        )
    }
}

/// Settings of the host facade
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    /// Origin the broker is expected to answer from
    pub broker_origin: String,
    /// Node API override forwarded to the broker on identify
    pub network_url: Option<String>,
    /// Deadline for each operational request
    pub request_timeout: Duration,
    /// Deadline for the embed to signal it is listening
    pub embed_timeout: Duration,
    /// Deadline for the broker to answer identification
    pub ready_timeout: Duration,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            broker_origin: default_broker_origin(),
            network_url: None,
            request_timeout: Duration::from_secs(30),
            embed_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
        }
    }
}
