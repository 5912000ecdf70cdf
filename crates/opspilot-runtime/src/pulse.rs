//! Background infrastructure pulse.
//!
//! One task per backend group polls on that group's interval, records
//! reachability, and refreshes the infrastructure index with pod and
//! deployment names. The tasks share a `CancellationToken` owned by the
//! pulse; `stop` cancels and joins them. Nothing here can fail a turn.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opspilot_connectors::Backend;
use opspilot_core::config::PulseConfig;
use opspilot_core::{BackendGroup, CapabilityRegistry, ExecutionResult, ResourceKind};
use opspilot_memory::{GroupStatus, InfrastructureIndex};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Namespace scanned for the index.
const SCAN_NAMESPACE: &str = "default";

#[derive(Clone)]
struct HealthCheck {
    registry: Arc<CapabilityRegistry>,
    backend: Arc<dyn Backend>,
    index: Arc<InfrastructureIndex>,
    timeout: Duration,
}

impl HealthCheck {
    async fn call(&self, group: BackendGroup, operation: &str, args: Value) -> ExecutionResult {
        let Some(capability) = self.registry.variant(operation, group) else {
            return ExecutionResult::failure(format!("No {} capability on {}", operation, group));
        };
        let arguments: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
        match tokio::time::timeout(self.timeout, self.backend.call(capability, &arguments)).await {
            Ok(result) => result,
            Err(_) => ExecutionResult::failure("Request timed out"),
        }
    }

    async fn poll(&self, group: BackendGroup) -> GroupStatus {
        let mut counts = BTreeMap::new();
        let check = match group {
            BackendGroup::Engine => {
                let result = self
                    .call(group, "list_containers", json!({"all": true, "limit": 10}))
                    .await;
                if let Some(items) = result.items("containers") {
                    counts.insert("containers".to_string(), items.len());
                }
                result
            }
            BackendGroup::LocalCluster | BackendGroup::RemoteCluster => {
                let result = self.call(group, "list_nodes", json!({})).await;
                if result.success {
                    if let Some(items) = result.items("nodes") {
                        counts.insert("nodes".to_string(), items.len());
                    }
                    let scan = json!({"namespace": SCAN_NAMESPACE});
                    let (pods, deployments) = tokio::join!(
                        self.call(group, "list_pods", scan.clone()),
                        self.call(group, "list_deployments", scan),
                    );
                    for (kind, listing) in [
                        (ResourceKind::Pod, pods),
                        (ResourceKind::Deployment, deployments),
                    ] {
                        if let Some(n) = self.index_listing(group, kind, &listing) {
                            counts.insert(kind.plural().to_string(), n);
                        }
                    }
                }
                result
            }
        };

        let now = Utc::now();
        let pruned = self.index.prune_at(now);
        if pruned > 0 {
            debug!("Pulse pruned {} stale index entries", pruned);
        }

        GroupStatus {
            connected: check.success,
            checked_at: now,
            error: check.error,
            counts,
        }
    }

    fn index_listing(
        &self,
        group: BackendGroup,
        kind: ResourceKind,
        listing: &ExecutionResult,
    ) -> Option<usize> {
        if !listing.success {
            return None;
        }
        let items = listing.items(kind.plural())?;
        let names: Vec<(String, Option<String>)> = items
            .iter()
            .filter_map(|item| {
                let name = item.get("name").and_then(Value::as_str)?;
                let namespace = item
                    .get("namespace")
                    .and_then(Value::as_str)
                    .unwrap_or(SCAN_NAMESPACE);
                Some((name.to_string(), Some(namespace.to_string())))
            })
            .collect();
        self.index.record(kind, group, &names, Utc::now());
        Some(names.len())
    }
}

struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct InfrastructurePulse {
    check: HealthCheck,
    config: PulseConfig,
    running: Mutex<Option<Running>>,
}

impl InfrastructurePulse {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        backend: Arc<dyn Backend>,
        index: Arc<InfrastructureIndex>,
        config: PulseConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            check: HealthCheck {
                registry,
                backend,
                index,
                timeout,
            },
            config,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Poll one group now and record its status.
    pub async fn poll_once(&self, group: BackendGroup) -> GroupStatus {
        let status = self.check.poll(group).await;
        record_status(&self.check.index, group, status.clone());
        status
    }

    /// Spawn the per-group loops. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let tasks = BackendGroup::all()
            .iter()
            .map(|&group| {
                let check = self.check.clone();
                let token = token.clone();
                let interval = self.config.interval_for(group);
                tokio::spawn(async move {
                    loop {
                        let status = tokio::select! {
                            _ = token.cancelled() => break,
                            status = check.poll(group) => status,
                        };
                        record_status(&check.index, group, status);
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                    debug!("Pulse loop for {} exited", group);
                })
            })
            .collect();
        info!("Infrastructure pulse started");
        *running = Some(Running { token, tasks });
    }

    /// Cancel the loops and wait for them to exit.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.token.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!("Pulse task ended abnormally: {}", e);
            }
        }
        info!("Infrastructure pulse stopped");
    }
}

/// Store a poll result, logging reachability changes.
fn record_status(index: &InfrastructureIndex, group: BackendGroup, status: GroupStatus) {
    let was_connected = index.status(group).map(|s| s.connected);
    match (was_connected, status.connected) {
        (Some(true) | None, false) => warn!(
            "Backend {} unreachable: {}",
            group,
            status.error.as_deref().unwrap_or("unknown error")
        ),
        (Some(false), true) => info!("Backend {} reachable again", group),
        _ => debug!("Pulse {}: connected={}", group, status.connected),
    }
    index.set_status(group, status);
}
