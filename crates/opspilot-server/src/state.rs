//! Shared application state.

use std::sync::Arc;

use opspilot_chat::{HttpLanguageModel, LLMConfig};
use opspilot_connectors::JsonRpcBackend;
use opspilot_core::{CapabilityRegistry, OpsPilotConfig, Result};
use opspilot_runtime::Orchestrator;
use parking_lot::RwLock;
use tracing::info;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: OpsPilotConfig,
    pub orchestrator: Orchestrator,
    /// Provider client; updated in place when the LLM config changes.
    pub llm: Arc<HttpLanguageModel>,
    pub llm_config: RwLock<LLMConfig>,
}

impl AppState {
    pub fn new(config: OpsPilotConfig, orchestrator: Orchestrator, llm: Arc<HttpLanguageModel>) -> Self {
        let llm_config = RwLock::new(llm.config());
        Self {
            config,
            orchestrator,
            llm,
            llm_config,
        }
    }

    /// Wire the JSON-RPC backend and HTTP model from configuration.
    pub fn from_config(config: OpsPilotConfig) -> Result<Self> {
        let registry = CapabilityRegistry::builtin()?;
        let backend = Arc::new(JsonRpcBackend::new(
            config.endpoints.clone(),
            config.dispatch_timeout,
        ));
        let llm_config = LLMConfig::load(&config.llm_config_file());
        match llm_config.resolve_provider() {
            Some(resolved) => info!(
                "LLM provider: {} ({} / fast {})",
                resolved.provider, resolved.model, resolved.fast_model
            ),
            None => info!("No LLM provider configured; only pattern and cache resolution available"),
        }
        let llm = Arc::new(HttpLanguageModel::new(llm_config, config.model_timeout));
        let orchestrator = Orchestrator::new(&config, registry, backend, llm.clone());
        Ok(Self::new(config, orchestrator, llm))
    }
}
