use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::locator::{PollConfig, StreamDefaults, DEFAULT_BASE_URL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub satellite: Option<String>,
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub autostart: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            satellite: None,
            interval_ms: None,
            options: Map::new(),
            base_url: default_base_url(),
            request_timeout_ms: None,
            autostart: false,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl StreamConfig {
    pub fn resolve(&self, defaults: &StreamDefaults) -> PollConfig {
        PollConfig::resolve(
            defaults,
            self.satellite.as_deref(),
            self.interval_ms,
            Some(&self.options),
        )
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadLocation,
    ControlStream,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn find_api_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.key == key)
    }
}
