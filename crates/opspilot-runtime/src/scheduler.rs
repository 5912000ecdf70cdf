//! Concurrent execution of resolved calls.
//!
//! A batch is gated as a whole, then every call is dispatched at once and
//! awaited together on the calling task. Outcomes are returned in input
//! order. Calls flagged for batch describe run their list call first, then
//! fan out one describe per listed resource. A speculative prefetch started
//! before resolution is reused when the batch asks for the identical call.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use opspilot_connectors::Backend;
use opspilot_core::{
    BatchDescribe, Capability, CapabilityRegistry, ExecutionResult, ResolvedCall,
};
use opspilot_protocol::{GateDecision, SafetyGate};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::{CallOutcome, ScheduleOutcome};

/// Longest event message kept in a compact batch entry.
const EVENT_MESSAGE_LIMIT: usize = 50;
/// Failing condition types named in a compact batch entry.
const CONDITION_NAME_LIMIT: usize = 3;

/// A describe call launched before resolution finished.
pub struct Prefetch {
    call: ResolvedCall,
    handle: JoinHandle<ExecutionResult>,
}

impl Prefetch {
    pub fn call(&self) -> &ResolvedCall {
        &self.call
    }

    /// Stop the in-flight call; its result will not be used.
    pub fn abandon(self) {
        debug!("Abandoning prefetch of {}", self.call.capability);
        self.handle.abort();
    }

    async fn join(self) -> ExecutionResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => ExecutionResult::failure(format!("Prefetch failed: {}", e)),
        }
    }
}

pub struct Scheduler {
    registry: Arc<CapabilityRegistry>,
    backend: Arc<dyn Backend>,
    gate: SafetyGate,
    timeout: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        backend: Arc<dyn Backend>,
        gate: SafetyGate,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            backend,
            gate,
            timeout,
        }
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    /// Gate the batch, then run every call concurrently.
    pub async fn execute(
        &self,
        calls: &[ResolvedCall],
        prefetch: Option<Prefetch>,
    ) -> ScheduleOutcome {
        if let GateDecision::Hold(assessment) = self.gate.check(calls) {
            if let Some(prefetch) = prefetch {
                prefetch.abandon();
            }
            return ScheduleOutcome::Held(assessment);
        }

        // Only the first identical plain call may claim the prefetch.
        let claim = prefetch.as_ref().and_then(|p| {
            calls
                .iter()
                .position(|c| c.flags.is_empty() && c.same_invocation(&p.call))
        });
        let mut prefetch = match (claim, prefetch) {
            (Some(_), p) => p,
            (None, Some(p)) => {
                p.abandon();
                None
            }
            (None, None) => None,
        };

        info!("Dispatching {} calls", calls.len());
        let futures = calls.iter().enumerate().map(|(i, call)| {
            let reused = if claim == Some(i) { prefetch.take() } else { None };
            async move {
                let result = match reused {
                    Some(p) => {
                        info!("Reusing prefetched result for {}", call.capability);
                        p.join().await
                    }
                    None => self.run(call).await,
                };
                CallOutcome {
                    source_call: call.clone(),
                    result,
                }
            }
        });
        ScheduleOutcome::Executed(join_all(futures).await)
    }

    /// Run one call the operator already approved. The gate is not consulted.
    pub async fn execute_approved(&self, call: &ResolvedCall) -> CallOutcome {
        info!("Executing approved call {}", call.capability);
        CallOutcome {
            source_call: call.clone(),
            result: self.run(call).await,
        }
    }

    /// Start a best-effort call on its own task. None if the call is invalid.
    pub fn prefetch(&self, call: ResolvedCall) -> Option<Prefetch> {
        let capability = self
            .registry
            .validate(&call.capability, &call.arguments)
            .ok()?
            .clone();
        let backend = self.backend.clone();
        let timeout = self.timeout;
        let arguments = call.arguments.clone();
        debug!("Prefetching {}", capability.name);
        let handle = tokio::spawn(async move {
            dispatch(backend.as_ref(), &capability, &arguments, timeout).await
        });
        Some(Prefetch { call, handle })
    }

    async fn run(&self, call: &ResolvedCall) -> ExecutionResult {
        let capability = match self.registry.validate(&call.capability, &call.arguments) {
            Ok(c) => c,
            Err(e) => {
                warn!("Refusing to dispatch {}: {}", call.capability, e);
                return ExecutionResult::failure(e.to_string());
            }
        };

        let result = dispatch(self.backend.as_ref(), capability, &call.arguments, self.timeout).await;
        match call.flags.batch_describe {
            Some(batch) if result.success => self.fan_out(call, capability, result, batch).await,
            _ => result,
        }
    }

    /// Describe every resource of a list result concurrently and aggregate.
    async fn fan_out(
        &self,
        call: &ResolvedCall,
        list_capability: &Capability,
        listing: ExecutionResult,
        batch: BatchDescribe,
    ) -> ExecutionResult {
        let kind = batch.resource_type;
        let Some(describe) = self
            .registry
            .variant(&kind.describe_operation(), list_capability.backend_group)
        else {
            return ExecutionResult::failure(format!(
                "No describe capability for {} on {}",
                kind, list_capability.backend_group
            ));
        };

        let items: Vec<Value> = listing.items(kind.plural()).cloned().unwrap_or_default();
        let namespace = call.arg_str("namespace").unwrap_or("default");
        let name_argument = kind.name_argument();

        let targets: Vec<(String, String)> = items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some((name.clone(), "Unknown".to_string())),
                Value::Object(obj) => {
                    let name = obj.get("name").and_then(Value::as_str)?;
                    let status = obj
                        .get("phase")
                        .or_else(|| obj.get("status"))
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown");
                    Some((name.to_string(), status.to_string()))
                }
                _ => None,
            })
            .collect();

        info!(
            "Batch describe: {} x {} (full detail: {})",
            targets.len(),
            describe.name,
            batch.full_detail
        );

        let describes = targets.iter().map(|(name, _)| {
            let mut arguments = Map::new();
            if kind.is_namespaced() {
                arguments.insert("namespace".into(), json!(namespace));
            }
            arguments.insert(name_argument.clone(), json!(name));
            async move { dispatch(self.backend.as_ref(), describe, &arguments, self.timeout).await }
        });
        let results = join_all(describes).await;

        let resources: Vec<Value> = targets
            .into_iter()
            .zip(results)
            .map(|((name, status), result)| batch_entry(name, status, &result, batch.full_detail))
            .collect();

        let mut payload = Map::new();
        payload.insert("_batch".into(), json!(true));
        payload.insert("_full_detail".into(), json!(batch.full_detail));
        payload.insert("resource_type".into(), json!(kind.singular()));
        payload.insert("count".into(), json!(resources.len()));
        payload.insert("resources".into(), Value::Array(resources));
        ExecutionResult::ok(payload)
    }
}

/// One backend call under the dispatch timeout.
async fn dispatch(
    backend: &dyn Backend,
    capability: &Capability,
    arguments: &Map<String, Value>,
    timeout: Duration,
) -> ExecutionResult {
    match tokio::time::timeout(timeout, backend.call(capability, arguments)).await {
        Ok(result) => {
            if let Some(error) = &result.error {
                warn!("{} failed: {}", capability.name, error);
            }
            result
        }
        Err(_) => {
            warn!("{} timed out after {:?}", capability.name, timeout);
            ExecutionResult::failure("Request timed out")
        }
    }
}

fn batch_entry(name: String, status: String, result: &ExecutionResult, full_detail: bool) -> Value {
    let mut entry = Map::new();
    entry.insert("name".into(), json!(name));
    entry.insert("status".into(), json!(status));
    if !result.success {
        let error = result.error.as_deref().unwrap_or("Unknown error");
        entry.insert("error".into(), json!(error));
    } else if full_detail {
        let details = result
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Object(result.payload.clone()));
        entry.insert("details".into(), details);
    } else {
        entry.insert("events".into(), json!(events_summary(result)));
        entry.insert("conditions".into(), json!(conditions_summary(result)));
    }
    Value::Object(entry)
}

/// Look for `key` at the top level, then inside a `data` object.
fn nested_items<'a>(result: &'a ExecutionResult, key: &str) -> &'a [Value] {
    result
        .items(key)
        .filter(|v| !v.is_empty())
        .or_else(|| result.get("data").and_then(|d| d.get(key)).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Last two event messages.
fn events_summary(result: &ExecutionResult) -> String {
    let events = nested_items(result, "events");
    if events.is_empty() {
        return "No recent events".into();
    }
    events[events.len().saturating_sub(2)..]
        .iter()
        .map(|e| match e.get("message").and_then(Value::as_str) {
            Some(message) => truncate_chars(message, EVENT_MESSAGE_LIMIT),
            None => truncate_chars(&e.to_string(), EVENT_MESSAGE_LIMIT),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Count and names of conditions whose status is not `True`.
fn conditions_summary(result: &ExecutionResult) -> String {
    let conditions = nested_items(result, "conditions");
    if conditions.is_empty() {
        return "No conditions".into();
    }
    let failing: Vec<&str> = conditions
        .iter()
        .filter(|c| c.get("status").and_then(Value::as_str) != Some("True"))
        .map(|c| c.get("type").and_then(Value::as_str).unwrap_or("Unknown"))
        .collect();
    if failing.is_empty() {
        return "All conditions healthy".into();
    }
    let shown: Vec<&str> = failing.iter().take(CONDITION_NAME_LIMIT).copied().collect();
    format!("{} issue(s): {}", failing.len(), shown.join(", "))
}
