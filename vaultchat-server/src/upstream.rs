//! Upstream chat-completion client.
//!
//! The upstream's JSON reply is returned untouched, including error objects
//! it encodes in a non-2xx response. Only transport failures and non-JSON
//! bodies are reported as errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use vaultchat_core::config::UpstreamConfig;
use vaultchat_core::ChatMessage;

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Send `messages` and return the provider's raw JSON reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<serde_json::Value, UpstreamError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Missing upstream API key")]
    MissingApiKey,

    #[error("Upstream returned a non-JSON body (HTTP {status}): {source}")]
    InvalidBody {
        status: u16,
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
}

/// Bearer-token JSON client for an OpenAI-style `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        if config.api_key.is_empty() {
            return Err(UpstreamError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl ChatCompletion for UpstreamClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<serde_json::Value, UpstreamError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(code = status.as_u16(), "Upstream returned an error status; relaying body");
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| UpstreamError::InvalidBody {
            status: status.as_u16(),
            source,
        })
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
