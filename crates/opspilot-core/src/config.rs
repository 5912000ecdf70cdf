//! Configuration loaded from `OPSPILOT_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::BackendGroup;

/// JSON-RPC endpoints for the three backend groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub engine_url: String,
    pub local_cluster_url: String,
    pub remote_cluster_url: String,
}

impl EndpointConfig {
    /// Endpoint serving the given backend group.
    pub fn url_for(&self, group: BackendGroup) -> &str {
        match group {
            BackendGroup::Engine => &self.engine_url,
            BackendGroup::LocalCluster => &self.local_cluster_url,
            BackendGroup::RemoteCluster => &self.remote_cluster_url,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            engine_url: "http://127.0.0.1:8080".into(),
            local_cluster_url: "http://127.0.0.1:8081".into(),
            remote_cluster_url: "http://127.0.0.1:8082".into(),
        }
    }
}

/// What to do with an ambiguous call when neither the query nor the
/// conversation picks a backend group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "group")]
pub enum DisambiguationMode {
    /// Rewrite to this group without asking.
    Default(BackendGroup),
    /// Leave the call alone and ask the operator to choose.
    Ask,
}

impl DisambiguationMode {
    /// Parse `ask`, `default:<group>` or a bare group name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        if s == "ask" {
            return Some(Self::Ask);
        }
        let group = s.strip_prefix("default:").unwrap_or(&s);
        BackendGroup::parse(group).map(Self::Default)
    }
}

impl Default for DisambiguationMode {
    fn default() -> Self {
        Self::Default(BackendGroup::RemoteCluster)
    }
}

/// Poll intervals for the background infrastructure pulse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    pub enabled: bool,
    pub engine_interval: Duration,
    pub local_cluster_interval: Duration,
    pub remote_cluster_interval: Duration,
    /// Index entries not refreshed within this window are dropped.
    pub index_ttl: Duration,
}

impl PulseConfig {
    pub fn interval_for(&self, group: BackendGroup) -> Duration {
        match group {
            BackendGroup::Engine => self.engine_interval,
            BackendGroup::LocalCluster => self.local_cluster_interval,
            BackendGroup::RemoteCluster => self.remote_cluster_interval,
        }
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine_interval: Duration::from_secs(10),
            local_cluster_interval: Duration::from_secs(30),
            remote_cluster_interval: Duration::from_secs(60),
            index_ttl: Duration::from_secs(300),
        }
    }
}

/// Top-level OpsPilot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsPilotConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory (holds `llm-config.json`).
    pub data_dir: PathBuf,
    pub endpoints: EndpointConfig,
    /// Per-call backend dispatch timeout.
    pub dispatch_timeout: Duration,
    /// Advisory timeout for live context fetches before resolution.
    pub context_timeout: Duration,
    /// Episodic memory entry lifetime.
    pub memory_ttl: Duration,
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
    /// Minimum cosine similarity for a paraphrased cache hit.
    pub cache_similarity: f32,
    /// Number of capabilities offered to the model.
    pub shortlist_size: usize,
    /// When false, similarity ranking falls back to lexical overlap.
    pub embeddings: bool,
    /// Careful-mode retries after the fast attempt fails.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Bound on a single model request.
    pub model_timeout: Duration,
    pub disambiguation: DisambiguationMode,
    /// When false, the safety gate lets dangerous calls through.
    pub safety_confirm: bool,
    pub pulse: PulseConfig,
}

impl Default for OpsPilotConfig {
    fn default() -> Self {
        Self {
            port: 3010,
            data_dir: PathBuf::from("data"),
            endpoints: EndpointConfig::default(),
            dispatch_timeout: Duration::from_secs(30),
            context_timeout: Duration::from_secs(2),
            memory_ttl: Duration::from_secs(300),
            cache_max_entries: 500,
            cache_ttl: Duration::from_secs(3600),
            cache_similarity: 0.92,
            shortlist_size: 8,
            embeddings: true,
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            model_timeout: Duration::from_secs(60),
            disambiguation: DisambiguationMode::default(),
            safety_confirm: true,
            pulse: PulseConfig::default(),
        }
    }
}

impl OpsPilotConfig {
    /// Create configuration from the process environment and defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let secs = |key: &str, default: Duration| {
            parse_u64(key).map(Duration::from_secs).unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            parse_u64(key).map(Duration::from_millis).unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };

        // Full URLs win over host + port.
        let host = lookup("OPSPILOT_BACKEND_HOST").unwrap_or_else(|| "127.0.0.1".into());
        let endpoint = |url_key: &str, port_key: &str, default_port: u16| {
            lookup(url_key).unwrap_or_else(|| {
                let port = lookup(port_key)
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(default_port);
                format!("http://{}:{}", host, port)
            })
        };

        let endpoints = EndpointConfig {
            engine_url: endpoint("OPSPILOT_ENGINE_URL", "OPSPILOT_ENGINE_PORT", 8080),
            local_cluster_url: endpoint("OPSPILOT_LOCAL_URL", "OPSPILOT_LOCAL_PORT", 8081),
            remote_cluster_url: endpoint("OPSPILOT_REMOTE_URL", "OPSPILOT_REMOTE_PORT", 8082),
        };

        let pulse = PulseConfig {
            enabled: flag("OPSPILOT_PULSE", defaults.pulse.enabled),
            engine_interval: secs("OPSPILOT_PULSE_ENGINE_SECS", defaults.pulse.engine_interval),
            local_cluster_interval: secs(
                "OPSPILOT_PULSE_LOCAL_SECS",
                defaults.pulse.local_cluster_interval,
            ),
            remote_cluster_interval: secs(
                "OPSPILOT_PULSE_REMOTE_SECS",
                defaults.pulse.remote_cluster_interval,
            ),
            index_ttl: secs("OPSPILOT_PULSE_INDEX_TTL_SECS", defaults.pulse.index_ttl),
        };

        Self {
            port: lookup("PORT")
                .or_else(|| lookup("OPSPILOT_PORT"))
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("OPSPILOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            endpoints,
            dispatch_timeout: secs("OPSPILOT_DISPATCH_TIMEOUT_SECS", defaults.dispatch_timeout),
            context_timeout: millis("OPSPILOT_CONTEXT_TIMEOUT_MS", defaults.context_timeout),
            memory_ttl: secs("OPSPILOT_MEMORY_TTL_SECS", defaults.memory_ttl),
            cache_max_entries: parse_u64("OPSPILOT_CACHE_MAX_ENTRIES")
                .map(|n| n as usize)
                .unwrap_or(defaults.cache_max_entries),
            cache_ttl: secs("OPSPILOT_CACHE_TTL_SECS", defaults.cache_ttl),
            cache_similarity: lookup("OPSPILOT_CACHE_SIMILARITY")
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|v| (0.0..=1.0).contains(v))
                .unwrap_or(defaults.cache_similarity),
            shortlist_size: parse_u64("OPSPILOT_SHORTLIST_SIZE")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.shortlist_size),
            embeddings: flag("OPSPILOT_EMBEDDINGS", defaults.embeddings),
            max_retries: parse_u64("OPSPILOT_MAX_RETRIES")
                .map(|n| n as u32)
                .unwrap_or(defaults.max_retries),
            retry_backoff: millis("OPSPILOT_RETRY_BACKOFF_MS", defaults.retry_backoff),
            model_timeout: secs("OPSPILOT_MODEL_TIMEOUT_SECS", defaults.model_timeout),
            disambiguation: lookup("OPSPILOT_DISAMBIGUATION")
                .and_then(|v| DisambiguationMode::parse(&v))
                .unwrap_or(defaults.disambiguation),
            safety_confirm: flag("OPSPILOT_SAFETY_CONFIRM", defaults.safety_confirm),
            pulse,
        }
    }

    /// Path of the persisted language-model provider settings.
    pub fn llm_config_file(&self) -> PathBuf {
        self.data_dir.join("llm-config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OpsPilotConfig::from_lookup(|_| None);
        assert_eq!(config.endpoints.engine_url, "http://127.0.0.1:8080");
        assert_eq!(config.endpoints.remote_cluster_url, "http://127.0.0.1:8082");
        assert_eq!(config.memory_ttl, Duration::from_secs(300));
        assert_eq!(config.max_retries, 2);
        assert_eq!(
            config.disambiguation,
            DisambiguationMode::Default(BackendGroup::RemoteCluster)
        );
        assert!(config.safety_confirm);
    }

    #[test]
    fn test_env_overrides() {
        let config = OpsPilotConfig::from_lookup(lookup_from(&[
            ("OPSPILOT_BACKEND_HOST", "10.0.0.5"),
            ("OPSPILOT_LOCAL_PORT", "9001"),
            ("OPSPILOT_REMOTE_URL", "https://remote.example:443"),
            ("OPSPILOT_DISAMBIGUATION", "ask"),
            ("OPSPILOT_CONTEXT_TIMEOUT_MS", "750"),
            ("OPSPILOT_SAFETY_CONFIRM", "false"),
        ]));
        assert_eq!(config.endpoints.engine_url, "http://10.0.0.5:8080");
        assert_eq!(config.endpoints.local_cluster_url, "http://10.0.0.5:9001");
        assert_eq!(config.endpoints.remote_cluster_url, "https://remote.example:443");
        assert_eq!(config.disambiguation, DisambiguationMode::Ask);
        assert_eq!(config.context_timeout, Duration::from_millis(750));
        assert!(!config.safety_confirm);
    }

    #[test]
    fn test_disambiguation_mode_parse() {
        assert_eq!(DisambiguationMode::parse("ASK"), Some(DisambiguationMode::Ask));
        assert_eq!(
            DisambiguationMode::parse("default:local"),
            Some(DisambiguationMode::Default(BackendGroup::LocalCluster))
        );
        assert_eq!(
            DisambiguationMode::parse("remote"),
            Some(DisambiguationMode::Default(BackendGroup::RemoteCluster))
        );
        assert_eq!(DisambiguationMode::parse("sometimes"), None);
    }

    #[test]
    fn test_invalid_similarity_ignored() {
        let config = OpsPilotConfig::from_lookup(lookup_from(&[("OPSPILOT_CACHE_SIMILARITY", "1.7")]));
        assert!((config.cache_similarity - 0.92).abs() < f32::EPSILON);
    }
}
