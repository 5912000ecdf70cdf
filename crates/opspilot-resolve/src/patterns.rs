//! Stage A: precompiled phrase patterns.
//!
//! Common requests ("list remote pods", "describe node kc-m1", "describe all
//! failing pods") map straight to a capability with extracted arguments and
//! no model call. Patterns are full-match and case-insensitive; the first
//! route that matches and can be built wins.

use std::sync::Arc;

use once_cell::sync::Lazy;
use opspilot_core::{
    BackendGroup, BatchDescribe, CallFlags, CapabilityRegistry, ResolvedCall, ResourceKind,
};
use opspilot_memory::MemorySnapshot;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::hints::{explicit_cluster, normalize_phase};

/// Namespace used when a namespaced capability gets none.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Upper bound on the list step of a batch describe.
pub const BATCH_LIST_LIMIT: u64 = 100;
/// Default `risk_threshold` for utilization analysis.
pub const DEFAULT_RISK_THRESHOLD: u64 = 90;

const SCOPE: &str = r"(?:(?:remote|local)\s+)?";
const CLUSTER: &str = r"(?:\s+(?:in|on|from)\s+(?:the\s+)?(?:remote|local)(?:\s+cluster)?)?";
const NS: &str = r"(?:\s+in\s+(?:the\s+)?(?:namespace\s+|ns\s+)?(?P<ns>[\w-]+)(?:\s+namespace)?)?";
const PHASE: &str = r"running|pending|failed|failing|succeeded|unknown|paused";
const NAME: &str = r"\w[\w.-]*";

/// Words that can follow a kind but never name an object.
const RESERVED_NAMES: &[&str] = &["logs", "events", "details", "status", "list"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    BatchDescribe,
    Ordinal,
    StopAllContainers,
    ListContainers,
    ContainerAction,
    ContainerLogs,
    InspectContainer,
    PodLogs,
    Events,
    FindNamespace,
    Utilization,
    RestartDeployment,
    ScaleDeployment,
    Promote,
    List,
    Describe,
}

fn compile(pattern: String) -> Regex {
    Regex::new(&format!("(?i)^(?:{})$", pattern)).unwrap()
}

static ROUTES: Lazy<Vec<(Route, Regex)>> = Lazy::new(|| {
    vec![
        (
            Route::BatchDescribe,
            compile(format!(
                r"describe\s+(?:all(?:\s+the)?|every)\s+{SCOPE}(?:(?P<phase>{PHASE})\s+)?{SCOPE}(?P<kind>pods?|deployments?|services?|nodes?)(?:\s+(?:with\s+)?(?P<detail>full\s+details?|all\s+details?|details|verbose|detailed))?{NS}{CLUSTER}"
            )),
        ),
        (
            Route::Ordinal,
            compile(format!(
                r"(?:describe|inspect|show|get)\s+(?:me\s+)?the\s+(?P<ord>first|second|third|fourth|fifth|last|\d+(?:st|nd|rd|th))\s+{SCOPE}(?P<kind>pod|node|deployment|service|container)(?:\s+details)?{CLUSTER}"
            )),
        ),
        (
            Route::StopAllContainers,
            compile(r"(?:docker\s+)?stop\s+(?:all|every)\s+(?:the\s+)?(?:running\s+)?containers?".to_string()),
        ),
        (
            Route::ListContainers,
            compile(
                r"docker\s+ps(?:\s+(?P<all>-a|--all))?|(?:list|show|get)\s+(?:me\s+)?(?P<every>all\s+)?(?:the\s+)?(?:docker\s+|running\s+)?containers"
                    .to_string(),
            ),
        ),
        (
            Route::ContainerAction,
            compile(format!(
                r"(?:docker\s+(?P<verb>stop|start|restart)|(?P<verb2>stop|start|restart)\s+(?:the\s+)?(?:docker\s+)?container)\s+(?P<id>{NAME})"
            )),
        ),
        (
            Route::ContainerLogs,
            compile(format!(
                r"(?:docker\s+logs|(?:show|get|fetch)\s+(?:me\s+)?(?:the\s+)?logs?\s+(?:for|of|from)\s+(?:the\s+)?container)\s+(?P<id>{NAME})"
            )),
        ),
        (
            Route::InspectContainer,
            compile(format!(
                r"(?:docker\s+inspect|(?:inspect|describe)\s+(?:the\s+)?container)\s+(?P<id>{NAME})"
            )),
        ),
        (
            Route::PodLogs,
            compile(format!(
                r"(?:show|get|fetch|view|tail)\s+(?:me\s+)?(?:the\s+)?{SCOPE}(?:pod\s+)?logs?\s+(?:for|of|from)\s+(?:the\s+)?{SCOPE}(?:pod\s+)?(?P<pod>{NAME}){NS}{CLUSTER}"
            )),
        ),
        (
            Route::Events,
            compile(format!(
                r"(?:show|list|get)\s+(?:me\s+)?(?:the\s+)?(?:recent\s+)?events\s+(?:for|of)\s+(?:the\s+)?(?:pod\s+)?(?P<pod>{NAME}){NS}{CLUSTER}"
            )),
        ),
        (
            Route::FindNamespace,
            compile(format!(
                r"(?:find|which|what)\s+(?:the\s+)?namespace\s+(?:for\s+|of\s+|is\s+|does\s+)?(?:the\s+)?(?:pod\s+|deployment\s+|service\s+)?(?P<name>{NAME})(?:\s+in|\s+live\s+in|\s+belong\s+to)?"
            )),
        ),
        (
            Route::Utilization,
            compile(format!(
                r"(?:(?:analy[sz]e|check|show)\s+)?(?:the\s+)?(?:resource\s+|cluster\s+)?utili[sz]ation{NS}{CLUSTER}"
            )),
        ),
        (
            Route::RestartDeployment,
            compile(format!(
                r"(?:rollout\s+)?restart\s+(?:the\s+)?{SCOPE}deployment\s+(?P<name>{NAME}){NS}{CLUSTER}"
            )),
        ),
        (
            Route::ScaleDeployment,
            compile(format!(
                r"scale\s+(?:the\s+)?{SCOPE}deployment\s+(?P<name>{NAME})\s+to\s+(?P<replicas>\d+)(?:\s+replicas?)?{NS}{CLUSTER}"
            )),
        ),
        (
            Route::Promote,
            compile(format!(
                r"promote\s+(?:the\s+)?(?P<rtype>pod|deployment|service|configmap|secret)\s+(?P<name>{NAME})(?:\s+from\s+(?:the\s+)?local(?:\s+cluster)?)?(?:\s+to\s+(?:the\s+)?remote(?:\s+cluster)?)?(?:\s+in\s+(?:namespace\s+)?(?P<ns>[\w-]+))?"
            )),
        ),
        (
            Route::List,
            compile(format!(
                r"(?:list|get|show)\s+(?:me\s+)?(?:all\s+)?(?:the\s+)?{SCOPE}(?:(?P<phase>{PHASE})\s+)?{SCOPE}(?P<kind>pods|nodes|deployments|services|namespaces)(?:\s+(?:that\s+are\s+)?(?P<phase2>{PHASE}))?{NS}{CLUSTER}"
            )),
        ),
        (
            Route::Describe,
            compile(format!(
                r"(?:describe|inspect|show|get)\s+(?:me\s+)?(?:the\s+)?{SCOPE}(?P<kind>pod|node|deployment|service)\s+(?P<name>{NAME}){NS}{CLUSTER}"
            )),
        ),
    ]
});

/// Collapse whitespace and drop trailing punctuation.
fn clean(query: &str) -> String {
    let mut q = query.split_whitespace().collect::<Vec<_>>().join(" ");
    while q.ends_with(['?', '.', '!']) {
        q.pop();
    }
    q
}

fn text<'a>(caps: &'a Captures, group: &str) -> Option<&'a str> {
    caps.name(group).map(|m| m.as_str())
}

/// A namespace capture, unless it was really a cluster word.
fn namespace(caps: &Captures) -> Option<String> {
    text(caps, "ns")
        .filter(|ns| !ns.eq_ignore_ascii_case("remote") && !ns.eq_ignore_ascii_case("local"))
        .map(str::to_string)
}

fn ordinal_index(word: &str) -> Option<usize> {
    let word = word.to_lowercase();
    let n = match word.as_str() {
        "first" => 1,
        "second" => 2,
        "third" => 3,
        "fourth" => 4,
        "fifth" => 5,
        other => other
            .trim_end_matches(|c: char| c.is_ascii_alphabetic())
            .parse::<usize>()
            .ok()?,
    };
    n.checked_sub(1)
}

/// Deterministic resolver for common phrasings.
pub struct PatternRouter {
    registry: Arc<CapabilityRegistry>,
}

impl PatternRouter {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `query` without inference, or None when no pattern applies.
    pub fn route(&self, query: &str, memory: &MemorySnapshot) -> Option<Vec<ResolvedCall>> {
        let cleaned = clean(query);
        if cleaned.is_empty() {
            return None;
        }
        let group = explicit_cluster(&cleaned).unwrap_or(BackendGroup::RemoteCluster);

        for (route, regex) in ROUTES.iter() {
            let Some(caps) = regex.captures(&cleaned) else {
                continue;
            };
            if let Some(calls) = self.build(*route, &caps, group, memory) {
                debug!("Pattern {:?} resolved '{}'", route, cleaned);
                return Some(calls);
            }
        }
        None
    }

    fn call(
        &self,
        operation: &str,
        group: BackendGroup,
        arguments: Map<String, Value>,
    ) -> Option<ResolvedCall> {
        let capability = self.registry.variant(operation, group)?;
        Some(ResolvedCall::new(capability.name.clone(), arguments))
    }

    fn build(
        &self,
        route: Route,
        caps: &Captures,
        group: BackendGroup,
        memory: &MemorySnapshot,
    ) -> Option<Vec<ResolvedCall>> {
        let call = match route {
            Route::BatchDescribe => {
                let kind = ResourceKind::parse(text(caps, "kind")?)?;
                let mut args = Map::new();
                if kind.is_namespaced() {
                    let ns = namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into());
                    args.insert("namespace".into(), json!(ns));
                }
                if kind == ResourceKind::Pod {
                    if let Some(phase) = text(caps, "phase").and_then(normalize_phase) {
                        args.insert("status_phase".into(), json!(phase));
                    }
                }
                args.insert("limit".into(), json!(BATCH_LIST_LIMIT));

                let mut call = self.call(&kind.list_operation(), group, args)?;
                call.flags = CallFlags {
                    batch_describe: Some(BatchDescribe {
                        resource_type: kind,
                        full_detail: text(caps, "detail").is_some(),
                    }),
                };
                call
            }
            Route::Ordinal => {
                let kind = ResourceKind::parse(text(caps, "kind")?)?;
                let ord = text(caps, "ord")?;
                let name = if ord.eq_ignore_ascii_case("last") {
                    memory.last_of(kind)?
                } else {
                    memory.ordinal(kind, ordinal_index(ord)?)?
                }
                .to_string();

                if kind == ResourceKind::Container {
                    let mut args = Map::new();
                    args.insert("container_name_or_id".into(), json!(name));
                    self.call("container_details", BackendGroup::Engine, args)?
                } else {
                    let mut args = Map::new();
                    if kind.is_namespaced() {
                        let ns = memory
                            .get(&name)
                            .and_then(|e| e.details.get("namespace"))
                            .and_then(Value::as_str)
                            .unwrap_or(DEFAULT_NAMESPACE)
                            .to_string();
                        args.insert("namespace".into(), json!(ns));
                    }
                    args.insert(kind.name_argument(), json!(name));
                    self.call(&kind.describe_operation(), group, args)?
                }
            }
            Route::StopAllContainers => {
                self.call("stop_all_containers", BackendGroup::Engine, Map::new())?
            }
            Route::ListContainers => {
                let mut args = Map::new();
                if text(caps, "all").is_some() || text(caps, "every").is_some() {
                    args.insert("all".into(), json!(true));
                }
                self.call("list_containers", BackendGroup::Engine, args)?
            }
            Route::ContainerAction => {
                let verb = text(caps, "verb").or_else(|| text(caps, "verb2"))?.to_lowercase();
                let mut args = Map::new();
                args.insert("container_name_or_id".into(), json!(text(caps, "id")?));
                self.call(&format!("{}_container", verb), BackendGroup::Engine, args)?
            }
            Route::ContainerLogs => {
                let mut args = Map::new();
                args.insert("container_name_or_id".into(), json!(text(caps, "id")?));
                self.call("container_logs", BackendGroup::Engine, args)?
            }
            Route::InspectContainer => {
                let mut args = Map::new();
                args.insert("container_name_or_id".into(), json!(text(caps, "id")?));
                self.call("container_details", BackendGroup::Engine, args)?
            }
            Route::PodLogs => {
                let pod = text(caps, "pod")?;
                if RESERVED_NAMES.contains(&pod.to_lowercase().as_str()) {
                    return None;
                }
                let mut args = Map::new();
                args.insert("pod_name".into(), json!(pod));
                args.insert(
                    "namespace".into(),
                    json!(namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into())),
                );
                self.call("pod_logs", group, args)?
            }
            Route::Events => {
                let mut args = Map::new();
                args.insert("pod_name".into(), json!(text(caps, "pod")?));
                args.insert(
                    "namespace".into(),
                    json!(namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into())),
                );
                self.call("list_events", BackendGroup::RemoteCluster, args)?
            }
            Route::FindNamespace => {
                let mut args = Map::new();
                args.insert("name".into(), json!(text(caps, "name")?));
                self.call("find_resource_namespace", BackendGroup::RemoteCluster, args)?
            }
            Route::Utilization => {
                let mut args = Map::new();
                args.insert(
                    "namespace".into(),
                    json!(namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into())),
                );
                args.insert("risk_threshold".into(), json!(DEFAULT_RISK_THRESHOLD));
                self.call("analyze_utilization", BackendGroup::RemoteCluster, args)?
            }
            Route::RestartDeployment => {
                let mut args = Map::new();
                args.insert("deployment_name".into(), json!(text(caps, "name")?));
                args.insert(
                    "namespace".into(),
                    json!(namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into())),
                );
                self.call("restart_deployment", group, args)?
            }
            Route::ScaleDeployment => {
                let replicas: u64 = text(caps, "replicas")?.parse().ok()?;
                let mut args = Map::new();
                args.insert("deployment_name".into(), json!(text(caps, "name")?));
                args.insert("replicas".into(), json!(replicas));
                args.insert(
                    "namespace".into(),
                    json!(namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into())),
                );
                self.call("scale_deployment", group, args)?
            }
            Route::Promote => {
                let mut args = Map::new();
                args.insert("resource_type".into(), json!(text(caps, "rtype")?.to_lowercase()));
                args.insert("name".into(), json!(text(caps, "name")?));
                args.insert(
                    "namespace".into(),
                    json!(namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into())),
                );
                self.call("promote_resource", BackendGroup::RemoteCluster, args)?
            }
            Route::List => {
                let kind = ResourceKind::parse(text(caps, "kind")?)?;
                let mut args = Map::new();
                if kind.is_namespaced() {
                    let ns = namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into());
                    args.insert("namespace".into(), json!(ns));
                }
                if kind == ResourceKind::Pod {
                    let phase = text(caps, "phase")
                        .or_else(|| text(caps, "phase2"))
                        .and_then(normalize_phase);
                    if let Some(phase) = phase {
                        args.insert("status_phase".into(), json!(phase));
                    }
                }
                self.call(&kind.list_operation(), group, args)?
            }
            Route::Describe => {
                let kind = ResourceKind::parse(text(caps, "kind")?)?;
                let name = text(caps, "name")?;
                if RESERVED_NAMES.contains(&name.to_lowercase().as_str()) {
                    return None;
                }
                let mut args = Map::new();
                args.insert(kind.name_argument(), json!(name));
                if kind.is_namespaced() {
                    let ns = namespace(caps).unwrap_or_else(|| DEFAULT_NAMESPACE.into());
                    args.insert("namespace".into(), json!(ns));
                }
                self.call(&kind.describe_operation(), group, args)?
            }
        };
        Some(vec![call])
    }
}
