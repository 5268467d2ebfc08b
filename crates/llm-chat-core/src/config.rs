//! Connection settings for the chat endpoint.
//!
//! Settings come from three layers, highest precedence first: explicit
//! overrides (CLI flags), `LLM_CHAT_*` environment variables, and the JSON
//! file at `<config_dir>/llm-chat/config.json`. The bridge never reads any of
//! these itself; callers resolve a [`ConnectionConfig`] and pass it in.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChatError, ConfigError};

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const ENV_ENDPOINT: &str = "LLM_CHAT_ENDPOINT";
pub const ENV_API_KEY: &str = "LLM_CHAT_API_KEY";
pub const ENV_TIMEOUT_SECS: &str = "LLM_CHAT_TIMEOUT_SECS";

/// Everything the request bridge needs for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Presence checks only; the endpoint is not parsed here.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.endpoint.trim().is_empty() {
            return Err(ChatError::Configuration("endpoint is empty".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ChatError::Configuration("API key is empty".to_string()));
        }
        Ok(())
    }
}

/// Values supplied on the command line. `None` leaves lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// The on-disk configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// A missing file is an empty config, not an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("llm-chat").join("config.json"))
    }

    /// Layer environment values over the file values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = Some(endpoint);
        }
        if let Some(api_key) = lookup(ENV_API_KEY) {
            self.api_key = Some(api_key);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_TIMEOUT_SECS,
                value: raw.clone(),
            })?;
            self.timeout_secs = Some(secs);
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(endpoint) = &overrides.endpoint {
            self.endpoint = Some(endpoint.clone());
        }
        if let Some(api_key) = &overrides.api_key {
            self.api_key = Some(api_key.clone());
        }
        if let Some(secs) = overrides.timeout_secs {
            self.timeout_secs = Some(secs);
        }
    }

    /// Missing values become empty strings so the bridge reports them as a
    /// configuration error at send time.
    pub fn connection(&self) -> ConnectionConfig {
        let timeout = match self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        ConnectionConfig {
            endpoint: self.endpoint.clone().unwrap_or_default(),
            api_key: self.api_key.clone().unwrap_or_default(),
            timeout,
        }
    }
}

/// Where a session gets its connection settings. Read once per send.
pub trait ConfigSource: Send + Sync {
    fn connection(&self) -> Result<ConnectionConfig, ChatError>;
}

impl ConfigSource for ConnectionConfig {
    fn connection(&self) -> Result<ConnectionConfig, ChatError> {
        Ok(self.clone())
    }
}

/// Re-reads the config file and environment on every send so edits take
/// effect without restarting the host.
#[derive(Debug, Clone, Default)]
pub struct LayeredConfigSource {
    path: Option<PathBuf>,
    overrides: Overrides,
}

impl LayeredConfigSource {
    pub fn new(overrides: Overrides) -> Self {
        Self {
            path: None,
            overrides,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.path {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        config.apply_env()?;
        config.apply_overrides(&self.overrides);
        Ok(config)
    }
}

impl ConfigSource for LayeredConfigSource {
    fn connection(&self) -> Result<ConnectionConfig, ChatError> {
        self.resolve()
            .map(|config| config.connection())
            .map_err(|e| ChatError::Configuration(e.to_string()))
    }
}
