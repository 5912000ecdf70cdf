//! The completion seam used by intent resolution.

use std::time::Duration;

use async_trait::async_trait;
use opspilot_core::{Error, Result};
use parking_lot::RwLock;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::LLMConfig;
use crate::providers::{self, Sampling};
use crate::types::{ChatMessage, ReasoningMode};

/// One completion request: instructions, prior turns, and the new query.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub history: Vec<ChatMessage>,
    pub user: String,
    pub mode: ReasoningMode,
}

impl CompletionRequest {
    /// Flatten into provider messages (system first).
    pub fn into_messages(self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::new("system", self.system));
        messages.extend(self.history);
        messages.push(ChatMessage::new("user", self.user));
        messages
    }
}

/// Opaque text-in, text-out model call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the raw completion text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Whether a provider is configured at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// `LanguageModel` backed by a configured HTTP provider.
pub struct HttpLanguageModel {
    client: Client,
    config: RwLock<LLMConfig>,
    timeout: Duration,
    max_tokens: usize,
}

impl HttpLanguageModel {
    pub fn new(config: LLMConfig, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            config: RwLock::new(config),
            timeout,
            max_tokens: 1024,
        }
    }

    /// Current provider settings.
    pub fn config(&self) -> LLMConfig {
        self.config.read().clone()
    }

    /// Replace provider settings for subsequent requests.
    pub fn set_config(&self, config: LLMConfig) {
        *self.config.write() = config;
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let config = self.config();
        let resolved = config
            .resolve_provider()
            .ok_or_else(|| Error::Model("No LLM provider configured".into()))?;
        let model = resolved.model_for(request.mode).to_string();
        debug!("Requesting {:?} completion from {} ({})", request.mode, resolved.provider, model);

        let sampling = Sampling {
            temperature: config.temperature,
            max_tokens: self.max_tokens,
        };
        let stream = providers::stream_llm(
            &self.client,
            &resolved,
            request.into_messages(),
            &model,
            sampling,
        );

        match tokio::time::timeout(self.timeout, providers::collect_stream(stream)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                warn!("Model request failed: {}", e);
                Err(Error::Model(e))
            }
            Err(_) => Err(Error::Model(format!(
                "Model request timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    fn is_available(&self) -> bool {
        self.config.read().resolve_provider().is_some()
    }
}
