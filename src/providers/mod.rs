//! External text-generation providers.
//!
//! The proxy performs no local business logic: it forwards a prompt
//! plus generation parameters to the selected provider and relays the
//! response or error. A transient failure (connect error, 429, 5xx)
//! earns exactly one retry with the same payload; anything else is
//! surfaced to the caller as-is.

mod keys;

pub use keys::KeyStore;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, GoogleConfig, OpenAIConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Google => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure: connect, TLS, timeout, or a garbled body.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// No stored key for the provider, or the provider rejected it.
    #[error("no usable credentials for {0}")]
    InvalidCredentials(Provider),

    /// The provider throttled the request.
    #[error("provider rate limited the request")]
    RateLimited,

    /// Any other provider-side error, relayed verbatim.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl ProviderError {
    /// Transient failures are worth one retry with the same payload.
    fn is_transient(&self) -> bool {
        match self {
            ProviderError::Unreachable(_) | ProviderError::RateLimited => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::InvalidCredentials(_) => false,
        }
    }
}

/// Generation parameters as received over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,

    /// Provider-specific model name; the configured default when absent.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedText {
    pub text: String,
    pub model: String,
    pub provider: Provider,
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
    -> Result<GeneratedText, ProviderError>;
}

/// Build the provider client for one request.
///
/// An absent stored credential is `InvalidCredentials` — there is no
/// fallback to another provider.
pub fn create_provider(
    provider: Provider,
    config: &Config,
    keys: &KeyStore,
) -> Result<Box<dyn TextProvider>, ProviderError> {
    let api_key = match keys.get(provider) {
        Ok(Some(key)) => key,
        Ok(None) => return Err(ProviderError::InvalidCredentials(provider)),
        Err(e) => {
            warn!("Key store unreadable: {}", e);
            return Err(ProviderError::InvalidCredentials(provider));
        }
    };

    match provider {
        Provider::OpenAI => Ok(Box::new(OpenAIProvider::new(
            &api_key,
            &config.providers.openai,
        ))),
        Provider::Google => Ok(Box::new(GoogleProvider::new(
            &api_key,
            &config.providers.google,
        ))),
    }
}

// OpenAI chat-completions client
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, config: &OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: config.base_url.clone(),
            default_model: config.model.clone(),
        }
    }
}

#[async_trait]
impl TextProvider for OpenAIProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedText, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let response_body = send_with_retry(Provider::OpenAI, builder).await?;
        let text = parse_openai_text(&response_body).ok_or_else(|| ProviderError::Api {
            status: 200,
            message: "response contained no generated text".to_string(),
        })?;

        Ok(GeneratedText {
            text,
            model,
            provider: Provider::OpenAI,
        })
    }
}

// Google Generative Language client (Gemini)
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl GoogleProvider {
    pub fn new(api_key: &str, config: &GoogleConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: config.base_url.clone(),
            default_model: config.model.clone(),
        }
    }
}

#[async_trait]
impl TextProvider for GoogleProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedText, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let body = json!({
            "contents": [{"parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
                "topP": 0.95,
                "topK": 40,
            },
        });

        let builder = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body);

        let response_body = send_with_retry(Provider::Google, builder).await?;
        let text = parse_google_text(&response_body).ok_or_else(|| ProviderError::Api {
            status: 200,
            message: "response contained no generated text".to_string(),
        })?;

        Ok(GeneratedText {
            text,
            model,
            provider: Provider::Google,
        })
    }
}

/// Send a request, retrying once on a transient failure.
async fn send_with_retry(
    provider: Provider,
    builder: RequestBuilder,
) -> Result<Value, ProviderError> {
    let retry = builder.try_clone();

    match send_once(provider, builder).await {
        Err(e) if e.is_transient() => match retry {
            Some(retry_builder) => {
                debug!("Transient failure from {}, retrying once: {}", provider, e);
                send_once(provider, retry_builder).await
            }
            None => Err(e),
        },
        other => other,
    }
}

async fn send_once(provider: Provider, builder: RequestBuilder) -> Result<Value, ProviderError> {
    let response = builder
        .send()
        .await
        .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

    let status = response.status().as_u16();
    let raw = response
        .text()
        .await
        .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

    if !(200..300).contains(&status) {
        return Err(match status {
            401 | 403 => ProviderError::InvalidCredentials(provider),
            429 => ProviderError::RateLimited,
            _ => ProviderError::Api {
                status,
                message: extract_error_message(&raw),
            },
        });
    }

    let body: Value = serde_json::from_str(&raw).map_err(|e| {
        ProviderError::Unreachable(format!("unparseable provider response: {}", e))
    })?;

    // Some APIs embed an error object in a 200 body
    if let Some(error) = body.get("error") {
        return Err(ProviderError::Api {
            status,
            message: error.to_string(),
        });
    }

    Ok(body)
}

fn extract_error_message(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| raw.chars().take(300).collect())
}

fn parse_openai_text(body: &Value) -> Option<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(String::from)
}

fn parse_google_text(body: &Value) -> Option<String> {
    let parts = body["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() { None } else { Some(text) }
}
