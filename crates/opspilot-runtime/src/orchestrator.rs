//! Orchestrator: owns the per-process stores and runs turns.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use opspilot_chat::LanguageModel;
use opspilot_connectors::Backend;
use opspilot_core::{
    BackendGroup, CapabilityRegistry, DisambiguationMode, OpsPilotConfig, ResolvedCall,
    SessionMessage, TurnOutput,
};
use opspilot_infer::{create_embedder, CachedTurn, ResponseCache};
use opspilot_memory::{extract_observations, EpisodicMemory, InfrastructureIndex};
use opspilot_protocol::{DefaultSafetyPolicy, SafetyGate, SafetyPolicy};
use opspilot_resolve::patterns::DEFAULT_NAMESPACE;
use opspilot_resolve::{
    Disambiguator, GroupSignal, IntentCascade, Resolution, ResolveRequest, RetryPolicy,
};
use regex::Regex;
use serde_json::{json, Map};
use tracing::{debug, info, warn};

use crate::context::LiveContextFetcher;
use crate::pulse::InfrastructurePulse;
use crate::render::render_outcomes;
use crate::scheduler::{Prefetch, Scheduler};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::types::{CallOutcome, GroupHealth, RuntimeStatus, ScheduleOutcome};

const UNRESOLVED_MESSAGE: &str =
    "I couldn't understand that request or map it to a valid tool. Please try again.";

/// A named resource mentioned before resolution finishes.
static PREFETCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:pod|container|deployment|node)\s+([\w-]+)").unwrap());

/// Words the prefetch pattern can catch that never name a pod.
const NOT_A_NAME: &[&str] = &["logs", "events", "in", "on", "is", "named", "called", "details", "status"];

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    memory: Arc<EpisodicMemory>,
    cache: Arc<ResponseCache>,
    cascade: IntentCascade,
    disambiguator: Disambiguator,
    scheduler: Scheduler,
    safety: Arc<DefaultSafetyPolicy>,
    sessions: Arc<dyn SessionStore>,
    index: Arc<InfrastructureIndex>,
    live: LiveContextFetcher,
    pulse: InfrastructurePulse,
    model: Arc<dyn LanguageModel>,
    pulse_enabled: bool,
}

impl Orchestrator {
    /// Wire every stage from configuration.
    pub fn new(
        config: &OpsPilotConfig,
        registry: CapabilityRegistry,
        backend: Arc<dyn Backend>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let registry = Arc::new(registry);
        let embedder = create_embedder(config.embeddings);
        let cache = Arc::new(ResponseCache::new(
            embedder.clone(),
            config.cache_max_entries,
            config.cache_ttl,
            config.cache_similarity,
        ));
        let cascade = IntentCascade::new(
            registry.clone(),
            cache.clone(),
            embedder,
            model.clone(),
            RetryPolicy::new(config.max_retries, config.retry_backoff),
            config.shortlist_size,
        );
        let safety = Arc::new(DefaultSafetyPolicy::new());
        let policy: Arc<dyn SafetyPolicy> = safety.clone();
        let gate = SafetyGate::new(registry.clone(), policy, config.safety_confirm);
        let scheduler = Scheduler::new(registry.clone(), backend.clone(), gate, config.dispatch_timeout);
        let index = Arc::new(InfrastructureIndex::new(config.pulse.index_ttl));
        let live = LiveContextFetcher::new(
            registry.clone(),
            backend.clone(),
            index.clone(),
            config.context_timeout,
        );
        let pulse = InfrastructurePulse::new(
            registry.clone(),
            backend,
            index.clone(),
            config.pulse.clone(),
            config.dispatch_timeout,
        );

        info!(
            "Orchestrator ready: {} capabilities, disambiguation={:?}, safety_confirm={}",
            registry.len(),
            config.disambiguation,
            config.safety_confirm
        );

        Self {
            disambiguator: Disambiguator::new(registry.clone(), config.disambiguation),
            memory: Arc::new(EpisodicMemory::new(config.memory_ttl)),
            sessions: Arc::new(InMemorySessionStore::default()),
            registry,
            cache,
            cascade,
            scheduler,
            safety,
            index,
            live,
            pulse,
            model,
            pulse_enabled: config.pulse.enabled,
        }
    }

    /// Replace the session store.
    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<EpisodicMemory> {
        &self.memory
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn index(&self) -> &Arc<InfrastructureIndex> {
        &self.index
    }

    /// Runtime-adjustable safety policy.
    pub fn safety_policy(&self) -> &Arc<DefaultSafetyPolicy> {
        &self.safety
    }

    pub fn pulse(&self) -> &InfrastructurePulse {
        &self.pulse
    }

    /// Start the infrastructure pulse, if enabled.
    pub fn start_background(&self) {
        if self.pulse_enabled {
            self.pulse.start();
        } else {
            info!("Infrastructure pulse disabled");
        }
    }

    pub async fn shutdown(&self) {
        self.pulse.stop().await;
    }

    /// Forget a session's history and memory.
    pub fn clear_session(&self, session_id: &str) -> bool {
        let memory = self.memory.clear(session_id);
        let history = self.sessions.clear(session_id);
        memory || history
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            capabilities: self.registry.len(),
            active_sessions: self.sessions.session_count(),
            cache_entries: self.cache.len(),
            indexed_resources: self.index.len(),
            model_available: self.model.is_available(),
            pulse_running: self.pulse.is_running(),
            backends: BackendGroup::all()
                .iter()
                .map(|&group| GroupHealth {
                    group,
                    status: self.index.status(group),
                })
                .collect(),
        }
    }

    /// Run one operator turn.
    pub async fn handle_turn(&self, session_id: &str, query: &str) -> TurnOutput {
        let history = self.sessions.history(session_id);
        self.sessions.append(session_id, SessionMessage::user(query));

        let snapshot = self.memory.read(session_id);
        let cache_context = self.memory.last_group(session_id);

        let (resolution, prefetch) =
            match self.cascade.resolve_fast(query, &snapshot, cache_context) {
                Some(resolution) => (resolution, None),
                None => {
                    let prefetch = self.speculate(query, &history);
                    let live = self.live.fetch(query).await;
                    let infrastructure = self.index.summary_block();
                    let mut request = ResolveRequest::new(query, &history, &snapshot);
                    request.cache_context = cache_context;
                    request.live_context = live.as_deref();
                    request.infrastructure =
                        (!infrastructure.is_empty()).then_some(infrastructure.as_str());
                    (self.cascade.resolve_with_model(&request).await, prefetch)
                }
            };

        let from_model = matches!(resolution, Resolution::Model { .. });
        let calls = match resolution {
            Resolution::Cached(turn) => {
                abandon(prefetch);
                let names = turn.tool_calls.iter().map(|c| c.capability.clone()).collect();
                self.sessions
                    .append(session_id, SessionMessage::assistant(turn.output.clone(), names));
                return TurnOutput {
                    output: turn.output,
                    tool_calls: turn.tool_calls,
                    ..Default::default()
                };
            }
            Resolution::Unresolved { error, .. } => {
                abandon(prefetch);
                warn!("Unresolved query '{}': {}", query, error);
                return self.reply(session_id, TurnOutput::message(UNRESOLVED_MESSAGE));
            }
            resolved => resolved.into_calls(),
        };

        let settled = self.disambiguator.disambiguate(calls, query, &history);
        if settled.needs_choice() {
            abandon(prefetch);
            let operation = self
                .registry
                .get(&settled.choices[0].capability)
                .map(|c| c.operation.clone())
                .unwrap_or_default();
            return self.reply(
                session_id,
                TurnOutput {
                    output: format!(
                        "'{}' exists on both clusters. Which one did you mean: local or remote?",
                        operation
                    ),
                    tool_calls: settled.choices,
                    disambiguation_needed: true,
                    ..Default::default()
                },
            );
        }
        let calls = settled.calls;

        match self.scheduler.execute(&calls, prefetch).await {
            ScheduleOutcome::Held(assessment) => {
                let output = format!("Action requires approval: {}", assessment.capability);
                self.reply(
                    session_id,
                    TurnOutput {
                        output,
                        tool_calls: calls,
                        confirmation_request: Some(assessment),
                        ..Default::default()
                    },
                )
            }
            ScheduleOutcome::Executed(outcomes) => {
                let output = self.finish(session_id, &outcomes);
                let succeeded = !outcomes.is_empty() && outcomes.iter().all(|o| o.result.success);
                // Replaying a cached mutation would skip the backend.
                let read_only = calls.iter().all(|c| {
                    self.registry
                        .get(&c.capability)
                        .is_some_and(|cap| !cap.is_mutating())
                });
                if from_model && succeeded && read_only && !output.is_empty() {
                    self.cascade.remember(
                        query,
                        self.memory.last_group(session_id),
                        CachedTurn {
                            output: output.clone(),
                            tool_calls: calls.clone(),
                        },
                    );
                }
                TurnOutput {
                    output,
                    tool_calls: calls,
                    ..Default::default()
                }
            }
        }
    }

    /// Execute one call the operator approved or picked.
    pub async fn confirm(&self, session_id: &str, call: ResolvedCall) -> TurnOutput {
        if let Err(e) = self.registry.validate(&call.capability, &call.arguments) {
            return self.reply(session_id, TurnOutput::message(format!("Cannot run call: {}", e)));
        }
        let outcome = self.scheduler.execute_approved(&call).await;
        let output = self.finish(session_id, std::slice::from_ref(&outcome));
        TurnOutput {
            output,
            tool_calls: vec![call],
            ..Default::default()
        }
    }

    /// Update memory, render, and log the assistant reply.
    fn finish(&self, session_id: &str, outcomes: &[CallOutcome]) -> String {
        self.observe(session_id, outcomes);
        let output = render_outcomes(&self.registry, outcomes);
        let names = outcomes
            .iter()
            .map(|o| o.source_call.capability.clone())
            .collect();
        self.sessions
            .append(session_id, SessionMessage::assistant(output.clone(), names));
        output
    }

    fn reply(&self, session_id: &str, turn: TurnOutput) -> TurnOutput {
        self.sessions
            .append(session_id, SessionMessage::assistant(turn.output.clone(), Vec::new()));
        turn
    }

    fn observe(&self, session_id: &str, outcomes: &[CallOutcome]) {
        let now = Utc::now();
        for outcome in outcomes.iter().filter(|o| o.result.success) {
            let Some(capability) = self.registry.get(&outcome.source_call.capability) else {
                continue;
            };
            self.memory.set_last_group(session_id, capability.backend_group);
            let observations = extract_observations(capability, &outcome.result, now);
            if observations.is_empty() {
                continue;
            }
            debug!(
                "Remembering {} entities from {}",
                observations.entities.len(),
                capability.name
            );
            for (kind, names) in observations.lists {
                self.memory.remember_list(session_id, kind, names, now);
            }
            self.memory.update(session_id, observations.entities);
        }
    }

    /// Start describing a named pod while the model is still thinking.
    fn speculate(&self, query: &str, history: &[SessionMessage]) -> Option<Prefetch> {
        if !query.to_lowercase().contains("pod") {
            return None;
        }
        let name = PREFETCH_RE.captures(query)?.get(1)?.as_str();
        if NOT_A_NAME.contains(&name.to_lowercase().as_str()) {
            return None;
        }
        let group = match self.disambiguator.signal(query, history) {
            GroupSignal::Explicit(group) | GroupSignal::Sticky(group) => group,
            GroupSignal::None => match self.disambiguator.mode() {
                DisambiguationMode::Default(group) => group,
                DisambiguationMode::Ask => return None,
            },
        };
        let capability = self.registry.variant("describe_pod", group)?;
        let mut arguments = Map::new();
        arguments.insert("pod_name".into(), json!(name));
        arguments.insert("namespace".into(), json!(DEFAULT_NAMESPACE));
        info!("Speculatively prefetching {} for {}", capability.name, name);
        self.scheduler
            .prefetch(ResolvedCall::new(capability.name.clone(), arguments))
    }
}

fn abandon(prefetch: Option<Prefetch>) {
    if let Some(p) = prefetch {
        p.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use opspilot_chat::CompletionRequest;
    use opspilot_core::{Capability, Error, ExecutionResult};
    use parking_lot::Mutex;
    use serde_json::Value;

    struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        requests: Mutex<usize>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                requests: Mutex::new(0),
            })
        }

        fn requests(&self) -> usize {
            *self.requests.lock()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _request: CompletionRequest) -> opspilot_core::Result<String> {
            *self.requests.lock() += 1;
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| Error::Model("script exhausted".into()))
        }
    }

    struct FakeBackend {
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn names(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn call(&self, capability: &Capability, arguments: &Map<String, Value>) -> ExecutionResult {
            self.calls.lock().push(capability.name.clone());
            let response = match capability.name.as_str() {
                "remote_list_pods" if arguments.get("status_phase").is_some() => json!({
                    "success": true,
                    "pods": [{"name": "web-1", "phase": "Failed"}, {"name": "web-2", "phase": "Failed"}]
                }),
                "remote_list_pods" => json!({"success": true, "pods": []}),
                "remote_list_nodes" | "local_list_nodes" => json!({
                    "success": true,
                    "nodes": [{"name": "kc-m1", "status": "Ready"}, {"name": "kc-w1", "status": "Ready"}]
                }),
                "remote_describe_node" => json!({"success": true, "data": "Name: kc-w1"}),
                "remote_describe_pod" => json!({"success": true, "events": [], "conditions": []}),
                _ => json!({"success": true, "message": format!("{} done", capability.name)}),
            };
            ExecutionResult::from_response(response)
        }
    }

    fn config() -> OpsPilotConfig {
        let mut config = OpsPilotConfig::default();
        config.retry_backoff = Duration::ZERO;
        config.pulse.enabled = false;
        config
    }

    fn orchestrator_with(
        config: OpsPilotConfig,
        replies: &[&str],
    ) -> (Orchestrator, Arc<ScriptedModel>, Arc<FakeBackend>) {
        let model = ScriptedModel::new(replies);
        let backend = Arc::new(FakeBackend {
            calls: Mutex::new(Vec::new()),
        });
        let orchestrator = Orchestrator::new(
            &config,
            CapabilityRegistry::builtin().unwrap(),
            backend.clone(),
            model.clone(),
        );
        (orchestrator, model, backend)
    }

    fn orchestrator(replies: &[&str]) -> (Orchestrator, Arc<ScriptedModel>, Arc<FakeBackend>) {
        orchestrator_with(config(), replies)
    }

    #[tokio::test]
    async fn test_list_remote_pods_end_to_end() {
        let (o, model, backend) = orchestrator(&[]);
        let turn = o.handle_turn("s1", "list remote pods").await;

        assert_eq!(turn.output, "No pods found in namespace 'default' (REMOTE).");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].capability, "remote_list_pods");
        assert_eq!(turn.tool_calls[0].arguments["namespace"], "default");
        assert_eq!(model.requests(), 0);
        assert_eq!(backend.names(), vec!["remote_list_pods"]);
        assert_eq!(o.memory().last_group("s1"), Some(BackendGroup::RemoteCluster));
        assert_eq!(o.sessions().history("s1").len(), 2);
    }

    #[tokio::test]
    async fn test_batch_describe_end_to_end() {
        let (o, _, backend) = orchestrator(&[]);
        let turn = o.handle_turn("s1", "describe all failing pods").await;

        assert!(turn.output.starts_with("Batch describe: 2 pods"), "{}", turn.output);
        let describes = backend
            .names()
            .into_iter()
            .filter(|n| n == "remote_describe_pod")
            .count();
        assert_eq!(describes, 2);
    }

    #[tokio::test]
    async fn test_dangerous_call_waits_for_confirmation() {
        let (o, _, backend) = orchestrator(&[]);
        let turn = o.handle_turn("s1", "stop container redis").await;

        assert_eq!(turn.output, "Action requires approval: docker_stop_container");
        let request = turn.confirmation_request.clone().unwrap();
        assert!(request.is_dangerous);
        assert!(backend.names().is_empty());

        let approved = o.confirm("s1", request.to_call()).await;
        assert_eq!(approved.output, "docker_stop_container done");
        assert_eq!(backend.names(), vec!["docker_stop_container"]);
    }

    #[tokio::test]
    async fn test_model_turn_is_cached() {
        let (o, model, backend) = orchestrator(&[r#"[{"name": "remote_list_nodes", "arguments": {}}]"#]);
        let query = "which machines back my cluster";

        let first = o.handle_turn("s1", query).await;
        assert!(first.output.contains("kc-m1"));
        assert_eq!(model.requests(), 1);

        let second = o.handle_turn("s1", query).await;
        assert_eq!(second.output, first.output);
        assert_eq!(second.tool_calls, first.tool_calls);
        assert_eq!(model.requests(), 1);
        assert_eq!(backend.names(), vec!["remote_list_nodes"]);
    }

    #[tokio::test]
    async fn test_mutating_model_turn_is_not_cached() {
        let mut config = config();
        config.safety_confirm = false;
        let reply = r#"[{"name": "docker_stop_container", "arguments": {"container_name_or_id": "redis"}}]"#;
        let (o, model, backend) = orchestrator_with(config, &[reply, reply]);
        let query = "halt the redis box";

        let first = o.handle_turn("s1", query).await;
        assert_eq!(first.output, "docker_stop_container done");
        let second = o.handle_turn("s1", query).await;
        assert_eq!(second.output, "docker_stop_container done");

        assert_eq!(model.requests(), 2);
        assert_eq!(backend.names(), vec!["docker_stop_container", "docker_stop_container"]);
    }

    #[tokio::test]
    async fn test_unresolvable_query() {
        let (o, model, backend) = orchestrator(&["no idea", "still nothing", "nope", "nope again"]);
        let turn = o.handle_turn("s1", "make it faster somehow").await;

        assert_eq!(turn.output, UNRESOLVED_MESSAGE);
        assert!(turn.tool_calls.is_empty());
        assert_eq!(model.requests(), 4);
        assert!(backend.names().is_empty());
    }

    #[tokio::test]
    async fn test_ask_mode_returns_choices() {
        let mut config = config();
        config.disambiguation = DisambiguationMode::Ask;
        let (o, _, backend) = orchestrator_with(config, &[]);

        let turn = o.handle_turn("s1", "list pods").await;
        assert!(turn.disambiguation_needed);
        let names: Vec<&str> = turn.tool_calls.iter().map(|c| c.capability.as_str()).collect();
        assert_eq!(names, vec!["local_list_pods", "remote_list_pods"]);
        assert!(backend.names().is_empty());

        let picked = o.confirm("s1", turn.tool_calls[1].clone()).await;
        assert_eq!(picked.output, "No pods found in namespace 'default' (REMOTE).");
    }

    #[tokio::test]
    async fn test_ordinal_follow_up_uses_memory() {
        let (o, _, backend) = orchestrator(&[]);
        o.handle_turn("s1", "list remote nodes").await;
        let turn = o.handle_turn("s1", "describe the second node").await;

        assert_eq!(turn.tool_calls[0].capability, "remote_describe_node");
        assert_eq!(turn.tool_calls[0].arguments["node_name"], "kc-w1");
        assert!(turn.output.contains("Name: kc-w1"));
        assert_eq!(backend.names(), vec!["remote_list_nodes", "remote_describe_node"]);
    }

    #[tokio::test]
    async fn test_clear_session() {
        let (o, _, _) = orchestrator(&[]);
        o.handle_turn("s1", "list remote nodes").await;
        assert!(o.clear_session("s1"));
        assert!(o.memory().read("s1").is_empty());
        assert!(o.sessions().history("s1").is_empty());
        assert!(!o.clear_session("s1"));
    }

    #[tokio::test]
    async fn test_custom_session_store() {
        let (o, _, _) = orchestrator(&[]);
        let o = o.with_session_store(Arc::new(InMemorySessionStore::new(1)));
        o.handle_turn("s1", "list remote pods").await;
        let history = o.sessions().history("s1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "No pods found in namespace 'default' (REMOTE).");
    }

    #[tokio::test]
    async fn test_status_reports_registry() {
        let (o, _, _) = orchestrator(&[]);
        let status = o.status();
        assert_eq!(status.capabilities, o.registry().len());
        assert!(!status.pulse_running);
        assert_eq!(status.backends.len(), 3);
    }
}
