pub mod models;
pub mod prompts;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
    #[error("LLM call timed out after {0}s")]
    Timeout(u64),
}

impl LlmError {
    // reqwest prints the request URL in its errors; the URL is dropped so
    // credentials in it never reach logs or stored turns.
    pub(crate) fn transport(e: reqwest::Error) -> Self {
        LlmError::ConnectionError(e.without_url().to_string())
    }

    pub(crate) fn decode(e: reqwest::Error) -> Self {
        LlmError::ResponseError(e.without_url().to_string())
    }
}

/// The one capability the pipeline needs from a language model provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Ollama,
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            "ollama" => Ok(Provider::Ollama),
            other => Err(LlmError::ConfigError(format!(
                "Unsupported LLM provider: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

/// Resolves the configured provider to a concrete client at construction
/// time and bounds every call with the configured timeout.
pub struct LlmManager {
    provider: Provider,
    client: Box<dyn LanguageModel>,
    timeout: Duration,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Provider = config.provider.parse()?;
        let client: Box<dyn LanguageModel> = match provider {
            Provider::OpenAi => Box::new(providers::openai::OpenAiProvider::new(config)?),
            Provider::Anthropic => Box::new(providers::anthropic::AnthropicProvider::new(config)?),
            Provider::Google => Box::new(providers::google::GoogleProvider::new(config)?),
            Provider::Ollama => Box::new(providers::ollama::OllamaProvider::new(config)?),
        };

        info!("LLM provider initialised: {}", provider);
        Ok(Self {
            provider,
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        debug!("Prompting {} ({} chars)", self.provider, user_prompt.len());
        match tokio::time::timeout(self.timeout, self.client.complete(system_prompt, user_prompt))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("{} call exceeded {:?}", self.provider, self.timeout);
                Err(LlmError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}
