use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

use crate::backend::BackendSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub ledger: LedgerConfig,
    pub openid: OpenIdConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Which backend module to load and the blobs its constructor receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub plugin: String,
    #[serde(default)]
    pub store: BackendSettings,
    #[serde(default)]
    pub accounts_repository: BackendSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIdConfig {
    /// Issuer URL; discovery material lives under `/.well-known/openid-configuration`.
    pub provider: String,
    /// Expected `aud` claim.
    pub client_id: String,
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub route_prefix: String,
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle handles older than this are reclaimed.
    pub idle_timeout_secs: u64,
}

fn default_discovery_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            route_prefix: "/charts-of-accounts".to_string(),
            enable_cors: false,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(data)?;
        let settings = settings.with_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("GATEWAY_BIND") {
            self.server.bind = v;
        } else if let Some(port) = env::var("PORT").ok().and_then(|s| s.parse::<u16>().ok()) {
            let host = self.server.bind.rsplit_once(':').map(|(h, _)| h).unwrap_or("0.0.0.0");
            self.server.bind = format!("{}:{}", host, port);
        }
        if let Ok(v) = env::var("GATEWAY_ROUTE_PREFIX") {
            self.server.route_prefix = v;
        }

        // Pool overrides
        if let Ok(v) = env::var("GATEWAY_POOL_IDLE_TIMEOUT_SECS") {
            self.pool.idle_timeout_secs = v.parse().unwrap_or(self.pool.idle_timeout_secs);
        }

        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.plugin.trim().is_empty() {
            return Err(ConfigError::Invalid("ledger.plugin must be non-empty".to_string()));
        }
        if self.openid.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("openid.client_id must be non-empty".to_string()));
        }
        url::Url::parse(&self.openid.provider)
            .map_err(|e| ConfigError::Invalid(format!("openid.provider: {}", e)))?;
        Ok(())
    }
}
