use std::sync::Arc;
use std::{fs, path::PathBuf};

use broker::config::BrokerConfig;
use common::crypto::SecretKey;
use common::postage::BatchId;
use common::store::{FileStore, KvStore};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "swarm-id";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "key.pem";
pub const STORE_DIR_NAME: &str = "store";
pub const DEFAULT_APP_ORIGIN: &str = "https://cli.swarm-id.local";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Origin this CLI identifies as when it pins the broker
    #[serde(default = "default_app_origin")]
    pub app_origin: String,
    #[serde(default)]
    pub postage: PostageConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

fn default_app_origin() -> String {
    DEFAULT_APP_ORIGIN.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_origin: default_app_origin(),
            postage: PostageConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

/// Postage batch granted to the CLI when it signs in
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostageConfig {
    /// Batch that pays for uploads. Without one the session is read-only.
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    /// Depth of the batch (defaults to the broker's default depth)
    #[serde(default)]
    pub depth: Option<u8>,
    /// Stamp chunks locally with the key in `key.pem` instead of
    /// letting the node stamp them
    #[serde(default)]
    pub self_signed: bool,
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the swarm-id directory (~/.swarm-id)
    pub app_dir: PathBuf,
    /// Path to the postage signer key PEM file
    pub key_path: PathBuf,
    /// Path to the key-value store shared by the broker and auth contexts
    pub store_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the swarm-id directory path (custom or default ~/.swarm-id)
    pub fn app_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new swarm-id state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;

        if app_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&app_dir)?;

        let store_path = app_dir.join(STORE_DIR_NAME);
        fs::create_dir_all(&store_path)?;

        // Signer key for self-signed postage
        let key = SecretKey::generate();
        let key_path = app_dir.join(KEY_FILE_NAME);
        fs::write(&key_path, key.to_pem())?;

        let config = config.unwrap_or_default();
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        Ok(Self {
            app_dir,
            key_path,
            store_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the swarm-id directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;

        if !app_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let key_path = app_dir.join(KEY_FILE_NAME);
        let store_path = app_dir.join(STORE_DIR_NAME);
        let config_path = app_dir.join(CONFIG_FILE_NAME);

        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }
        if !store_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", STORE_DIR_NAME)));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            app_dir,
            key_path,
            store_path,
            config_path,
            config,
        })
    }

    /// Load the postage signer key from the key file
    pub fn load_key(&self) -> Result<SecretKey, StateError> {
        let pem = fs::read_to_string(&self.key_path)?;
        let key = SecretKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        Ok(key)
    }

    /// File-backed store holding sessions, the master key and utilization
    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::new(FileStore::new(self.store_path.clone()))
    }

    /// Batch depth used for this CLI's uploads
    pub fn depth(&self) -> u8 {
        self.config
            .postage
            .depth
            .unwrap_or(self.config.broker.default_depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("swarm-id directory not initialized. Run 'swarm-id init' first")]
    NotInitialized,

    #[error("swarm-id directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("state");
        let config = AppConfig {
            postage: PostageConfig {
                batch_id: Some(BatchId::from([3u8; 32])),
                depth: Some(20),
                self_signed: true,
            },
            ..Default::default()
        };

        let state = AppState::init(Some(dir.clone()), Some(config)).unwrap();
        assert!(state.store_path.is_dir());
        let key = state.load_key().unwrap();

        let loaded = AppState::load(Some(dir)).unwrap();
        assert_eq!(loaded.config.postage.batch_id, Some(BatchId::from([3u8; 32])));
        assert!(loaded.config.postage.self_signed);
        assert_eq!(loaded.depth(), 20);
        assert_eq!(loaded.config.app_origin, DEFAULT_APP_ORIGIN);
        assert_eq!(loaded.load_key().unwrap(), key);
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("state");
        AppState::init(Some(dir.clone()), None).unwrap();
        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_requires_init() {
        let temp = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(temp.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_depth_falls_back_to_broker_default() {
        let temp = tempfile::tempdir().unwrap();
        let state = AppState::init(Some(temp.path().join("state")), None).unwrap();
        assert_eq!(state.depth(), state.config.broker.default_depth);
    }

    #[test]
    fn test_sparse_config_loads() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("state");
        AppState::init(Some(dir.clone()), None).unwrap();
        fs::write(
            dir.join(CONFIG_FILE_NAME),
            "app_origin = \"https://other.example\"\n\n[broker]\ndefault_depth = 21\n",
        )
        .unwrap();

        let state = AppState::load(Some(dir)).unwrap();
        assert_eq!(state.config.app_origin, "https://other.example");
        assert_eq!(state.depth(), 21);
        assert!(state.config.postage.batch_id.is_none());
    }
}
