use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid api base url '{value}': {source}")]
    InvalidBaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("api base url '{0}' cannot carry path segments")]
    UnsupportedBaseUrl(String),
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    api_base_url: Option<String>,
    poll_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = self.api_base_url.trim();
        let url = Url::parse(raw).map_err(|source| ConfigError::InvalidBaseUrl {
            value: raw.to_string(),
            source,
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::UnsupportedBaseUrl(raw.to_string()));
        }
        Ok(url)
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(Duration::from_millis(self.poll_interval_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Loads `client.toml` from the working directory (if present) and applies
/// environment overrides on top.
pub fn load_client_config() -> ClientConfig {
    load_client_config_from(Path::new(DEFAULT_CONFIG_FILE), |key| std::env::var(key).ok())
}

pub fn load_client_config_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientConfig {
    let mut config = ClientConfig::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileConfig>(&raw) {
            Ok(file_cfg) => apply_file_config(&mut config, file_cfg),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ignoring unreadable client config file");
            }
        }
    }

    apply_env_overrides(&mut config, env);
    config
}

fn apply_file_config(config: &mut ClientConfig, file_cfg: FileConfig) {
    if let Some(v) = file_cfg.api_base_url {
        config.api_base_url = v;
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        config.poll_interval_ms = v;
    }
    if let Some(v) = file_cfg.request_timeout_ms {
        config.request_timeout_ms = v;
    }
}

fn apply_env_overrides(config: &mut ClientConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("VIZ_API_BASE_URL") {
        config.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        config.api_base_url = v;
    }

    for key in ["VIZ_POLL_INTERVAL_MS", "APP__POLL_INTERVAL_MS"] {
        if let Some(parsed) = env(key).and_then(|v| v.parse::<u64>().ok()) {
            config.poll_interval_ms = parsed;
        }
    }

    if let Some(parsed) = env("APP__REQUEST_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.request_timeout_ms = parsed;
    }
}
