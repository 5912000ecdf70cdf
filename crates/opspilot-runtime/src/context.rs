//! Live context fetched just before model resolution.
//!
//! A handful of cheap list calls chosen from the query's wording. The whole
//! fetch runs under an advisory timeout: on timeout or failure the turn
//! continues without it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use opspilot_connectors::Backend;
use opspilot_core::{BackendGroup, CapabilityRegistry, ExecutionResult};
use opspilot_memory::InfrastructureIndex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Greetings and small talk that never need live context.
const CHAT_KEYWORDS: &[&str] = &[
    "hi", "hello", "hey", "help", "who are you", "what is this", "thanks", "thank you", "bye",
    "test",
];

/// Which sources a query asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextWants {
    pub containers: bool,
    pub local_pods: bool,
    pub remote_nodes: bool,
}

impl ContextWants {
    pub fn any(&self) -> bool {
        self.containers || self.local_pods || self.remote_nodes
    }
}

pub fn is_small_talk(query: &str) -> bool {
    let q = query.trim().to_lowercase();
    CHAT_KEYWORDS
        .iter()
        .any(|w| q == *w || q.strip_prefix(w).is_some_and(|rest| rest.starts_with(' ')))
}

/// Pick context sources from the query. Remote is skipped while it is down.
pub fn wants_for(query: &str, remote_down: bool) -> ContextWants {
    if is_small_talk(query) {
        return ContextWants::default();
    }
    let q = query.to_lowercase();
    let mut wants = ContextWants {
        containers: q.contains("docker") || q.contains("container"),
        local_pods: ["local", "pod", "deployment", "service"]
            .iter()
            .any(|w| q.contains(w)),
        remote_nodes: !remote_down && (q.contains("remote") || q.contains("node")),
    };
    if !wants.any() && ["list", "get", "show"].iter().any(|w| q.contains(w)) {
        wants.local_pods = true;
    }
    wants
}

pub struct LiveContextFetcher {
    registry: Arc<CapabilityRegistry>,
    backend: Arc<dyn Backend>,
    index: Arc<InfrastructureIndex>,
    timeout: Duration,
}

impl LiveContextFetcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        backend: Arc<dyn Backend>,
        index: Arc<InfrastructureIndex>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            backend,
            index,
            timeout,
        }
    }

    /// A `[System Context: ...]` block, or None when nothing was gathered.
    pub async fn fetch(&self, query: &str) -> Option<String> {
        let wants = wants_for(query, self.index.is_down(BackendGroup::RemoteCluster));
        if !wants.any() {
            return None;
        }

        let mut sources: Vec<(&str, &str, Value, &str)> = Vec::new();
        if wants.containers {
            sources.push(("Running Containers", "docker_list_containers", json!({"all": false}), "containers"));
        }
        if wants.local_pods {
            sources.push(("Active Pods (Default)", "local_list_pods", json!({"namespace": "default"}), "pods"));
        }
        if wants.remote_nodes {
            sources.push(("Available Nodes (Remote)", "remote_list_nodes", json!({}), "nodes"));
        }

        let calls = sources.iter().map(|(_, name, args, _)| async move {
            let Some(capability) = self.registry.get(name) else {
                return ExecutionResult::failure(format!("unknown capability {}", name));
            };
            let arguments: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
            self.backend.call(capability, &arguments).await
        });

        let results = match tokio::time::timeout(self.timeout, join_all(calls)).await {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    "Live context timed out after {:?} (proceeding without it)",
                    self.timeout
                );
                return None;
            }
        };

        let parts: Vec<String> = sources
            .iter()
            .zip(results)
            .filter_map(|((label, name, _, key), result)| {
                if !result.success {
                    debug!("Context source {} failed: {:?}", name, result.error);
                    return None;
                }
                let names: Vec<String> = result
                    .items(key)?
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        other => other.get("name").and_then(Value::as_str).map(str::to_string),
                    })
                    .collect();
                (!names.is_empty()).then(|| format!("{}: {}", label, names.join(", ")))
            })
            .collect();

        if parts.is_empty() {
            return None;
        }
        debug!("Injected live context from {} source(s)", parts.len());
        Some(format!("[System Context: {}]", parts.join(" | ")))
    }
}
