//! The four-stage intent cascade.
//!
//! Stage A (patterns) and Stage B (response cache) are synchronous and
//! cheap; Stage C shortlists capabilities and Stage D asks the model, fast
//! pass first, then careful retries in strict sequence.

use std::sync::Arc;

use opspilot_chat::{ChatMessage, CompletionRequest, LanguageModel, ReasoningMode};
use opspilot_core::{BackendGroup, Capability, CapabilityRegistry, ResolvedCall};
use opspilot_infer::{CachedTurn, EmbedderBackend, ResponseCache};
use opspilot_memory::MemorySnapshot;
use tracing::{debug, info, warn};

use crate::decode::decode_calls;
use crate::patterns::PatternRouter;
use crate::prompt::{self, PromptContext};
use crate::retry::{RetryPolicy, RetryState};
use crate::shortlist::Shortlister;
use crate::types::{Resolution, ResolveRequest};

/// Error text and raw output of one failed model attempt.
type AttemptFailure = (String, Option<String>);

pub struct IntentCascade {
    registry: Arc<CapabilityRegistry>,
    patterns: PatternRouter,
    cache: Arc<ResponseCache>,
    shortlister: Shortlister,
    model: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    shortlist_size: usize,
}

impl IntentCascade {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        cache: Arc<ResponseCache>,
        embedder: Arc<dyn EmbedderBackend>,
        model: Arc<dyn LanguageModel>,
        policy: RetryPolicy,
        shortlist_size: usize,
    ) -> Self {
        let shortlister = Shortlister::new(&registry, embedder);
        Self {
            patterns: PatternRouter::new(registry.clone()),
            registry,
            cache,
            shortlister,
            model,
            policy,
            shortlist_size: shortlist_size.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Stages A and B. None means the model is needed.
    pub fn resolve_fast(
        &self,
        query: &str,
        memory: &MemorySnapshot,
        cache_context: Option<BackendGroup>,
    ) -> Option<Resolution> {
        if let Some(calls) = self.patterns.route(query, memory) {
            info!("Resolved by pattern: {:?}", names(&calls));
            return Some(Resolution::Pattern(calls));
        }
        if let Some(turn) = self.cache.lookup(query, cache_context) {
            info!("Answered from response cache ({} calls)", turn.tool_calls.len());
            return Some(Resolution::Cached(turn));
        }
        None
    }

    /// Stages C and D.
    pub async fn resolve_with_model(&self, request: &ResolveRequest<'_>) -> Resolution {
        if !self.model.is_available() {
            warn!("No language model configured; cannot resolve '{}'", request.query);
            return Resolution::Unresolved {
                error: "No language model configured".into(),
                last_response: None,
            };
        }

        let shortlist = self.shortlister.shortlist(request.query, self.shortlist_size);
        let capabilities: Vec<&Capability> =
            shortlist.iter().filter_map(|n| self.registry.get(n)).collect();
        let memory_block = request.memory.to_prompt_block();
        let context = PromptContext {
            memory: Some(memory_block.as_str()),
            live: request.live_context,
            infrastructure: request.infrastructure,
        };
        let history = prompt::history_messages(request.history);

        let fast_system = prompt::system_prompt(ReasoningMode::Fast, &capabilities, &context);
        let seeded = match self
            .attempt(ReasoningMode::Fast, &fast_system, &history, request.query, None)
            .await
        {
            Ok(calls) => {
                info!("Resolved by fast model pass: {:?}", names(&calls));
                return Resolution::Model {
                    calls,
                    mode: ReasoningMode::Fast,
                    requests: 1,
                };
            }
            Err((error, raw)) => {
                debug!("Fast pass failed: {}", error);
                RetryState::seeded(error, raw)
            }
        };

        let careful_system = prompt::system_prompt(ReasoningMode::Careful, &capabilities, &context);
        let mut state = seeded;
        while self.policy.allows(&state) {
            let delay = self.policy.delay_before(&state);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let feedback = state.feedback();
            match self
                .attempt(
                    ReasoningMode::Careful,
                    &careful_system,
                    &history,
                    request.query,
                    feedback.as_deref(),
                )
                .await
            {
                Ok(calls) => {
                    info!(
                        "Resolved by careful attempt {}: {:?}",
                        state.attempts() + 1,
                        names(&calls)
                    );
                    return Resolution::Model {
                        calls,
                        mode: ReasoningMode::Careful,
                        requests: state.attempts() + 2,
                    };
                }
                Err((error, raw)) => {
                    warn!("Careful attempt {} failed: {}", state.attempts() + 1, error);
                    state = state.record(error, raw);
                }
            }
        }

        Resolution::Unresolved {
            error: state.last_error().unwrap_or("Resolution failed").to_string(),
            last_response: state.last_response().map(str::to_string),
        }
    }

    /// Full cascade for one query.
    pub async fn resolve(&self, request: &ResolveRequest<'_>) -> Resolution {
        if let Some(resolution) =
            self.resolve_fast(request.query, request.memory, request.cache_context)
        {
            return resolution;
        }
        self.resolve_with_model(request).await
    }

    /// Cache a completed turn for later Stage B hits.
    pub fn remember(&self, query: &str, context: Option<BackendGroup>, turn: CachedTurn) {
        self.cache.put(query, context, turn);
    }

    async fn attempt(
        &self,
        mode: ReasoningMode,
        system: &str,
        history: &[ChatMessage],
        query: &str,
        feedback: Option<&str>,
    ) -> Result<Vec<ResolvedCall>, AttemptFailure> {
        let request = CompletionRequest {
            system: system.to_string(),
            history: history.to_vec(),
            user: prompt::user_prompt(query, feedback),
            mode,
        };
        let raw = self
            .model
            .complete(request)
            .await
            .map_err(|e| (e.to_string(), None))?;
        decode_calls(&raw, &self.registry).map_err(|e| (e.to_string(), Some(raw)))
    }
}

fn names(calls: &[ResolvedCall]) -> Vec<&str> {
    calls.iter().map(|c| c.capability.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use opspilot_core::{Error, SessionMessage};
    use opspilot_infer::{HashingEmbedder, NoopEmbedder};
    use parking_lot::Mutex;

    struct ScriptedModel {
        available: bool,
        replies: Mutex<VecDeque<opspilot_core::Result<String>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<opspilot_core::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                available: true,
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: CompletionRequest) -> opspilot_core::Result<String> {
            self.requests.lock().push(request);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Model("script exhausted".into())))
        }

        fn is_available(&self) -> bool {
            self.available
        }
    }

    fn cascade(model: Arc<ScriptedModel>) -> IntentCascade {
        let embedder: Arc<dyn EmbedderBackend> = Arc::new(HashingEmbedder::new(512));
        let cache = Arc::new(ResponseCache::new(
            embedder.clone(),
            16,
            Duration::from_secs(3600),
            0.92,
        ));
        IntentCascade::new(
            Arc::new(CapabilityRegistry::builtin().unwrap()),
            cache,
            embedder,
            model,
            RetryPolicy::new(2, Duration::ZERO),
            6,
        )
    }

    #[tokio::test]
    async fn test_pattern_hit_makes_no_model_call() {
        let model = ScriptedModel::new(Vec::new());
        let cascade = cascade(model.clone());
        let memory = MemorySnapshot::default();
        let resolution = cascade
            .resolve(&ResolveRequest::new("list remote pods", &[], &memory))
            .await;
        assert_eq!(resolution.calls()[0].capability, "remote_list_pods");
        assert_eq!(resolution.stage(), Some(crate::ResolutionStage::Pattern));
        assert_eq!(model.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_respects_context() {
        let model = ScriptedModel::new(Vec::new());
        let cascade = cascade(model.clone());
        let turn = CachedTurn {
            output: "3 pods failing".into(),
            tool_calls: Vec::new(),
        };
        cascade.remember("why is checkout broken", Some(BackendGroup::RemoteCluster), turn.clone());

        let memory = MemorySnapshot::default();
        let hit = cascade.resolve_fast("Why is checkout broken?", &memory, Some(BackendGroup::RemoteCluster));
        assert_eq!(hit, Some(Resolution::Cached(turn)));
        assert!(cascade
            .resolve_fast("why is checkout broken", &memory, Some(BackendGroup::LocalCluster))
            .is_none());
        assert_eq!(model.request_count(), 0);
    }

    #[tokio::test]
    async fn test_fast_pass_success() {
        let model = ScriptedModel::new(vec![Ok(
            r#"[{"name": "remote_list_deployments", "arguments": {"namespace": "shop"}}]"#.into(),
        )]);
        let cascade = cascade(model.clone());
        let memory = MemorySnapshot::default();
        let history = vec![SessionMessage::user("hello")];
        let resolution = cascade
            .resolve(&ResolveRequest::new("what is deployed in shop", &history, &memory))
            .await;

        match resolution {
            Resolution::Model { calls, mode, requests } => {
                assert_eq!(calls[0].capability, "remote_list_deployments");
                assert_eq!(mode, ReasoningMode::Fast);
                assert_eq!(requests, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        let requests = model.requests.lock();
        assert_eq!(requests[0].mode, ReasoningMode::Fast);
        assert_eq!(requests[0].history.len(), 1);
        assert_eq!(requests[0].user, "what is deployed in shop");
    }

    #[tokio::test]
    async fn test_careful_retry_gets_feedback() {
        let model = ScriptedModel::new(vec![
            Ok(r#"[{"name": "remote_get_everything"}]"#.into()),
            Ok(r#"[{"name": "remote_describe_pod", "arguments": {}}]"#.into()),
            Ok("<thinking>need the pod name</thinking>[{\"name\": \"remote_describe_pod\", \"arguments\": {\"pod_name\": \"web-1\"}}]".into()),
        ]);
        let cascade = cascade(model.clone());
        let memory = MemorySnapshot::default();
        let resolution = cascade
            .resolve(&ResolveRequest::new("what is wrong with web-1", &[], &memory))
            .await;

        match resolution {
            Resolution::Model { calls, mode, requests } => {
                assert_eq!(calls[0].arguments["pod_name"], "web-1");
                assert_eq!(mode, ReasoningMode::Careful);
                assert_eq!(requests, 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        let requests = model.requests.lock();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].mode, ReasoningMode::Careful);
        assert!(requests[1]
            .user
            .contains("Error: Capability 'remote_get_everything' does not exist."));
        assert!(requests[2].user.contains("missing required argument: 'pod_name'"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_response() {
        let model = ScriptedModel::new(vec![
            Ok("no idea".into()),
            Ok("still no idea".into()),
            Err(Error::Model("Model request timed out after 60s".into())),
            Ok("[]".into()),
        ]);
        let cascade = cascade(model.clone());
        let memory = MemorySnapshot::default();
        let resolution = cascade
            .resolve(&ResolveRequest::new("make it faster", &[], &memory))
            .await;

        assert_eq!(
            resolution,
            Resolution::Unresolved {
                error: "Response contained no capability calls".into(),
                last_response: Some("[]".into()),
            }
        );
        // One fast pass plus three careful attempts.
        assert_eq!(model.request_count(), 4);
    }

    #[tokio::test]
    async fn test_unavailable_model() {
        let model = Arc::new(ScriptedModel {
            available: false,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        });
        let embedder: Arc<dyn EmbedderBackend> = Arc::new(NoopEmbedder::new(8));
        let cascade = IntentCascade::new(
            Arc::new(CapabilityRegistry::builtin().unwrap()),
            Arc::new(ResponseCache::new(embedder.clone(), 4, Duration::from_secs(60), 0.9)),
            embedder,
            model.clone(),
            RetryPolicy::default(),
            4,
        );
        let memory = MemorySnapshot::default();
        let resolution = cascade
            .resolve(&ResolveRequest::new("make it faster", &[], &memory))
            .await;
        assert!(matches!(resolution, Resolution::Unresolved { .. }));
        assert_eq!(model.request_count(), 0);
    }
}
