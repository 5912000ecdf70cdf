//! Settles calls that exist on both clusters.
//!
//! Priority per ambiguous call: a cluster named in the query, then the one
//! cluster used throughout the conversation, then the configured mode
//! (a default group, or asking the operator).

use std::collections::BTreeSet;
use std::sync::Arc;

use opspilot_core::{
    BackendGroup, CapabilityRegistry, DisambiguationMode, ResolvedCall, Role, SessionMessage,
};
use tracing::{debug, info};

use crate::hints::{explicit_cluster, mentioned_clusters};

/// Where a backend-group choice came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Explicit(BackendGroup),
    Sticky(BackendGroup),
    None,
}

/// Rewritten calls, plus both candidates when the operator must choose.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Disambiguation {
    pub calls: Vec<ResolvedCall>,
    /// Local then remote variant of the first unsettled call (ask mode).
    pub choices: Vec<ResolvedCall>,
}

impl Disambiguation {
    pub fn needs_choice(&self) -> bool {
        !self.choices.is_empty()
    }
}

pub struct Disambiguator {
    registry: Arc<CapabilityRegistry>,
    mode: DisambiguationMode,
}

impl Disambiguator {
    pub fn new(registry: Arc<CapabilityRegistry>, mode: DisambiguationMode) -> Self {
        Self { registry, mode }
    }

    pub fn mode(&self) -> DisambiguationMode {
        self.mode
    }

    /// The single cluster seen across history, if only one was.
    pub fn sticky_group(&self, history: &[SessionMessage]) -> Option<BackendGroup> {
        let mut seen = BTreeSet::new();
        for message in history {
            match message.role {
                Role::Assistant => {
                    for name in &message.capabilities {
                        if let Some(capability) = self.registry.get(name) {
                            if capability.backend_group.is_cluster() {
                                seen.insert(capability.backend_group);
                            }
                        }
                    }
                }
                Role::User => seen.extend(mentioned_clusters(&message.content)),
                Role::System => {}
            }
        }
        if seen.len() == 1 {
            seen.into_iter().next()
        } else {
            None
        }
    }

    pub fn signal(&self, query: &str, history: &[SessionMessage]) -> GroupSignal {
        if let Some(group) = explicit_cluster(query) {
            return GroupSignal::Explicit(group);
        }
        match self.sticky_group(history) {
            Some(group) => GroupSignal::Sticky(group),
            None => GroupSignal::None,
        }
    }

    pub fn disambiguate(
        &self,
        calls: Vec<ResolvedCall>,
        query: &str,
        history: &[SessionMessage],
    ) -> Disambiguation {
        let signal = self.signal(query, history);
        let target = match (signal, self.mode) {
            (GroupSignal::Explicit(group) | GroupSignal::Sticky(group), _) => Some(group),
            (GroupSignal::None, DisambiguationMode::Default(group)) => Some(group),
            (GroupSignal::None, DisambiguationMode::Ask) => None,
        };

        let mut choices = Vec::new();
        let calls = calls
            .into_iter()
            .map(|mut call| {
                let Some(capability) = self.registry.get(&call.capability) else {
                    return call;
                };
                if !self.registry.is_ambiguous(&call.capability) {
                    return call;
                }
                match target {
                    Some(group) if group != capability.backend_group => {
                        if let Some(variant) = self.registry.variant(&capability.operation, group) {
                            debug!(
                                "Disambiguation ({:?}): {} -> {}",
                                signal, call.capability, variant.name
                            );
                            call.capability = variant.name.clone();
                        }
                    }
                    Some(_) => {}
                    None if choices.is_empty() => {
                        for group in [BackendGroup::LocalCluster, BackendGroup::RemoteCluster] {
                            if let Some(variant) =
                                self.registry.variant(&capability.operation, group)
                            {
                                let mut choice = call.clone();
                                choice.capability = variant.name.clone();
                                choices.push(choice);
                            }
                        }
                    }
                    None => {}
                }
                call
            })
            .collect();

        if !choices.is_empty() {
            info!("Asking operator to choose a cluster for {}", choices[0].capability);
        }
        Disambiguation { calls, choices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opspilot_core::{BatchDescribe, CallFlags, ResourceKind};
    use serde_json::{json, Map};

    fn disambiguator(mode: DisambiguationMode) -> Disambiguator {
        Disambiguator::new(Arc::new(CapabilityRegistry::builtin().unwrap()), mode)
    }

    fn remote_default() -> Disambiguator {
        disambiguator(DisambiguationMode::Default(BackendGroup::RemoteCluster))
    }

    fn call(name: &str) -> ResolvedCall {
        ResolvedCall::new(name, json!({"namespace": "default"}).as_object().cloned().unwrap())
    }

    fn local_history() -> Vec<SessionMessage> {
        vec![
            SessionMessage::user("show pods"),
            SessionMessage::assistant("3 pods", vec!["local_list_pods".into()]),
            SessionMessage::user("and nodes"),
            SessionMessage::assistant("1 node", vec!["local_list_nodes".into()]),
        ]
    }

    #[test]
    fn test_explicit_token_beats_history() {
        let result = remote_default().disambiguate(
            vec![call("local_list_pods")],
            "list the remote pods",
            &local_history(),
        );
        assert_eq!(result.calls[0].capability, "remote_list_pods");
        assert!(!result.needs_choice());
    }

    #[test]
    fn test_both_clusters_named_prefers_remote() {
        let d = disambiguator(DisambiguationMode::Ask);
        let result = d.disambiguate(
            vec![call("local_list_pods")],
            "list remote pods that were promoted from local",
            &local_history(),
        );
        assert_eq!(result.calls[0].capability, "remote_list_pods");
        assert!(!result.needs_choice());
    }

    #[test]
    fn test_sticky_local_history() {
        let result = remote_default().disambiguate(
            vec![call("remote_list_deployments")],
            "what deployments are there",
            &local_history(),
        );
        assert_eq!(result.calls[0].capability, "local_list_deployments");
        assert_eq!(result.calls[0].arguments["namespace"], "default");
    }

    #[test]
    fn test_mixed_history_falls_back_to_default() {
        let mut history = local_history();
        history.push(SessionMessage::assistant("2 pods", vec!["remote_list_pods".into()]));
        let d = remote_default();
        assert_eq!(d.sticky_group(&history), None);

        let result = d.disambiguate(vec![call("local_list_pods")], "list pods", &history);
        assert_eq!(result.calls[0].capability, "remote_list_pods");
    }

    #[test]
    fn test_engine_history_is_not_sticky() {
        let history = vec![SessionMessage::assistant(
            "2 containers",
            vec!["docker_list_containers".into()],
        )];
        assert_eq!(remote_default().sticky_group(&history), None);
    }

    #[test]
    fn test_non_ambiguous_calls_untouched() {
        let calls = vec![call("remote_list_events"), call("docker_list_containers")];
        let result = disambiguator(DisambiguationMode::Default(BackendGroup::LocalCluster))
            .disambiguate(calls.clone(), "events please", &[]);
        assert_eq!(result.calls, calls);
    }

    #[test]
    fn test_flags_survive_rewrite() {
        let mut batch = ResolvedCall::new("remote_list_pods", Map::new());
        batch.flags = CallFlags {
            batch_describe: Some(BatchDescribe {
                resource_type: ResourceKind::Pod,
                full_detail: false,
            }),
        };
        let result = remote_default().disambiguate(vec![batch], "describe all local pods", &[]);
        assert_eq!(result.calls[0].capability, "local_list_pods");
        assert!(result.calls[0].flags.batch_describe.is_some());
    }

    #[test]
    fn test_ask_mode_offers_both_variants() {
        let d = disambiguator(DisambiguationMode::Ask);
        let result = d.disambiguate(vec![call("remote_list_pods")], "list pods", &[]);
        assert!(result.needs_choice());
        assert_eq!(result.calls[0].capability, "remote_list_pods");
        let names: Vec<&str> = result.choices.iter().map(|c| c.capability.as_str()).collect();
        assert_eq!(names, vec!["local_list_pods", "remote_list_pods"]);

        let settled = d.disambiguate(vec![call("remote_list_pods")], "list local pods", &[]);
        assert!(!settled.needs_choice());
        assert_eq!(settled.calls[0].capability, "local_list_pods");
    }
}
