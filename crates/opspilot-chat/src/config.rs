//! LLM configuration persistence and provider selection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{LLMConfigResponse, LLMConfigUpdate, LLMProvider, ReasoningMode};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

pub const DEFAULT_OPENAI_FAST_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANTHROPIC_FAST_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_GROQ_FAST_MODEL: &str = "llama-3.1-8b-instant";

/// Stored LLM configuration (persisted to llm-config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    #[serde(default = "default_preferred")]
    pub preferred_provider: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub groq_api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_groq_model")]
    pub groq_model: String,
    /// Local Ollama server, e.g. `http://localhost:11434`.
    #[serde(default)]
    pub ollama_host: Option<String>,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    /// Model for the fast pass; provider default when unset.
    #[serde(default)]
    pub fast_model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Path to config file for saving.
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_preferred() -> String {
    "auto".into()
}
fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.into()
}
fn default_anthropic_model() -> String {
    DEFAULT_ANTHROPIC_MODEL.into()
}
fn default_groq_model() -> String {
    DEFAULT_GROQ_MODEL.into()
}
fn default_ollama_model() -> String {
    DEFAULT_OLLAMA_MODEL.into()
}
fn default_temperature() -> f64 {
    0.1
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            preferred_provider: "auto".into(),
            openai_api_key: None,
            anthropic_api_key: None,
            groq_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.into(),
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.into(),
            groq_model: DEFAULT_GROQ_MODEL.into(),
            ollama_host: None,
            ollama_model: DEFAULT_OLLAMA_MODEL.into(),
            fast_model: None,
            temperature: default_temperature(),
            config_path: PathBuf::new(),
        }
    }
}

/// A usable provider with its model pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProvider {
    pub provider: LLMProvider,
    pub model: String,
    pub fast_model: String,
    /// None for keyless local servers.
    pub api_key: Option<String>,
    /// Chat endpoint base (only meaningful for Ollama).
    pub base_url: Option<String>,
}

impl ResolvedProvider {
    pub fn model_for(&self, mode: ReasoningMode) -> &str {
        match mode {
            ReasoningMode::Fast => &self.fast_model,
            ReasoningMode::Careful => &self.model,
        }
    }
}

impl LLMConfig {
    /// Load config from file, falling back to env vars and defaults.
    pub fn load(config_path: &Path) -> Self {
        let mut config: LLMConfig = std::fs::read_to_string(config_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        config.config_path = config_path.to_path_buf();

        // Env vars as fallback
        if config.openai_api_key.is_none() {
            config.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if config.anthropic_api_key.is_none() {
            config.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        if config.groq_api_key.is_none() {
            config.groq_api_key = std::env::var("GROQ_API_KEY").ok();
        }
        if config.ollama_host.is_none() {
            config.ollama_host = std::env::var("OLLAMA_HOST").ok();
        }
        if config.fast_model.is_none() {
            config.fast_model = std::env::var("OPSPILOT_LLM_FAST_MODEL").ok();
        }

        config
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, e)
        })?;
        std::fs::write(&self.config_path, json)?;
        info!("Saved LLM config to {}", self.config_path.display());
        Ok(())
    }

    /// Merge a partial update from the API.
    pub fn apply_update(&mut self, update: &LLMConfigUpdate) {
        if let Some(p) = &update.preferred_provider {
            self.preferred_provider = p.clone();
        }
        if let Some(k) = &update.openai_api_key {
            self.openai_api_key = Some(k.clone());
        }
        if let Some(k) = &update.anthropic_api_key {
            self.anthropic_api_key = Some(k.clone());
        }
        if let Some(k) = &update.groq_api_key {
            self.groq_api_key = Some(k.clone());
        }
        if let Some(h) = &update.ollama_host {
            self.ollama_host = Some(h.clone());
        }
        if let Some(m) = &update.openai_model {
            self.openai_model = m.clone();
        }
        if let Some(m) = &update.anthropic_model {
            self.anthropic_model = m.clone();
        }
        if let Some(m) = &update.groq_model {
            self.groq_model = m.clone();
        }
        if let Some(m) = &update.ollama_model {
            self.ollama_model = m.clone();
        }
        if let Some(m) = &update.fast_model {
            self.fast_model = Some(m.clone());
        }
    }

    fn keyed(
        &self,
        provider: LLMProvider,
        key: &Option<String>,
        model: &str,
        fast_default: &str,
    ) -> Option<ResolvedProvider> {
        key.as_ref().map(|k| ResolvedProvider {
            provider,
            model: model.to_string(),
            fast_model: self.fast_model.clone().unwrap_or_else(|| fast_default.to_string()),
            api_key: Some(k.clone()),
            base_url: None,
        })
    }

    fn ollama(&self) -> Option<ResolvedProvider> {
        self.ollama_host.as_ref().map(|host| ResolvedProvider {
            provider: LLMProvider::Ollama,
            model: self.ollama_model.clone(),
            fast_model: self
                .fast_model
                .clone()
                .unwrap_or_else(|| self.ollama_model.clone()),
            api_key: None,
            base_url: Some(host.trim_end_matches('/').to_string()),
        })
    }

    /// Resolve which provider and models to use.
    pub fn resolve_provider(&self) -> Option<ResolvedProvider> {
        let openai = || {
            self.keyed(LLMProvider::OpenAI, &self.openai_api_key, &self.openai_model, DEFAULT_OPENAI_FAST_MODEL)
        };
        let anthropic = || {
            self.keyed(
                LLMProvider::Anthropic,
                &self.anthropic_api_key,
                &self.anthropic_model,
                DEFAULT_ANTHROPIC_FAST_MODEL,
            )
        };
        let groq = || {
            self.keyed(LLMProvider::Groq, &self.groq_api_key, &self.groq_model, DEFAULT_GROQ_FAST_MODEL)
        };

        // Explicit preference
        if self.preferred_provider != "auto" {
            return match self.preferred_provider.as_str() {
                "openai" => openai(),
                "anthropic" => anthropic(),
                "groq" => groq(),
                "ollama" => self.ollama(),
                _ => None,
            };
        }

        // Auto mode: Anthropic > Groq > OpenAI > Ollama
        anthropic()
            .or_else(groq)
            .or_else(openai)
            .or_else(|| self.ollama())
    }

    /// Build the public config response (no API keys exposed).
    pub fn to_response(&self) -> LLMConfigResponse {
        let resolved = self.resolve_provider();
        LLMConfigResponse {
            preferred_provider: self.preferred_provider.clone(),
            openai_configured: self.openai_api_key.is_some(),
            anthropic_configured: self.anthropic_api_key.is_some(),
            groq_configured: self.groq_api_key.is_some(),
            ollama_host: self.ollama_host.clone(),
            active_provider: resolved.as_ref().map(|r| r.provider.to_string()),
            active_model: resolved.as_ref().map(|r| r.model.clone()),
            fast_model: resolved.map(|r| r.fast_model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> LLMConfig {
        LLMConfig::default()
    }

    #[test]
    fn test_no_provider() {
        assert!(bare().resolve_provider().is_none());
    }

    #[test]
    fn test_auto_prefers_anthropic() {
        let mut config = bare();
        config.openai_api_key = Some("sk-o".into());
        config.anthropic_api_key = Some("sk-a".into());
        let resolved = config.resolve_provider().unwrap();
        assert_eq!(resolved.provider, LLMProvider::Anthropic);
        assert_eq!(resolved.model_for(ReasoningMode::Careful), DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(resolved.model_for(ReasoningMode::Fast), DEFAULT_ANTHROPIC_FAST_MODEL);
    }

    #[test]
    fn test_explicit_ollama_without_key() {
        let mut config = bare();
        config.preferred_provider = "ollama".into();
        config.ollama_host = Some("http://localhost:11434/".into());
        config.fast_model = Some("llama3.2:1b".into());
        let resolved = config.resolve_provider().unwrap();
        assert_eq!(resolved.provider, LLMProvider::Ollama);
        assert!(resolved.api_key.is_none());
        assert_eq!(resolved.base_url.as_deref(), Some("http://localhost:11434"));
        assert_eq!(resolved.fast_model, "llama3.2:1b");
    }

    #[test]
    fn test_explicit_preference_without_key() {
        let mut config = bare();
        config.preferred_provider = "groq".into();
        config.openai_api_key = Some("sk-o".into());
        assert!(config.resolve_provider().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm-config.json");
        let mut config = LLMConfig::load(&path);
        config.preferred_provider = "openai".into();
        config.openai_model = "gpt-4.1".into();
        config.save().unwrap();

        let reloaded = LLMConfig::load(&path);
        assert_eq!(reloaded.preferred_provider, "openai");
        assert_eq!(reloaded.openai_model, "gpt-4.1");
        assert!((reloaded.temperature - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_apply_update_keeps_unset_fields() {
        let mut config = bare();
        config.openai_model = "gpt-4.1".into();
        let update: LLMConfigUpdate =
            serde_json::from_value(serde_json::json!({"preferredProvider": "groq", "groqApiKey": "gsk"}))
                .unwrap();
        config.apply_update(&update);
        assert_eq!(config.preferred_provider, "groq");
        assert_eq!(config.groq_api_key.as_deref(), Some("gsk"));
        assert_eq!(config.openai_model, "gpt-4.1");
    }

    #[test]
    fn test_response_masks_keys() {
        let mut config = bare();
        config.groq_api_key = Some("gsk".into());
        let resp = serde_json::to_value(config.to_response()).unwrap();
        assert_eq!(resp["groqConfigured"], true);
        assert_eq!(resp["activeProvider"], "groq");
        assert!(!resp.to_string().contains("gsk\""));
    }
}
