use std::fmt;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Environment variable prefix; nested keys use `__`, e.g.
/// `VAULTCHAT_VAULT__ENCRYPTION_SECRET`.
pub const ENV_PREFIX: &str = "VAULTCHAT";

#[derive(Debug, Deserialize, Clone)]
pub struct VaultChatConfig {
    #[serde(default)]
    pub http: HttpConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body; bigger chat posts get a 500 `{error}`.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct VaultConfig {
    pub encryption_secret: String,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    604_800
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("encryption_secret", &"<redacted>")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            timeout_seconds: 120,
        }
    }
}

impl UpstreamConfig {
    /// Fill an empty `api_key` from `DEEPSEEK_API_KEY`.
    pub fn with_env_fallback(mut self) -> Self {
        if self.api_key.is_empty() {
            self.api_key = std::env::var("DEEPSEEK_API_KEY").unwrap_or_default();
        }
        self
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// How the partition key for a request is derived. The result is never
/// authenticated: any caller able to set the header picks its own partition.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    pub header: String,
    pub fallback_to_peer: bool,
    pub sentinel: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: "CF-Connecting-IP".to_string(),
            fallback_to_peer: false,
            sentinel: "anonymous".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub purge_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: 5,
            purge_interval_seconds: 3600,
        }
    }
}

impl VaultChatConfig {
    /// Load from an optional TOML file, overridden by `VAULTCHAT_*` env vars.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(env_source())
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}

/// Env values stay strings until deserialization, so an all-digit secret
/// keeps its exact bytes. Numeric and boolean fields still parse from them.
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
