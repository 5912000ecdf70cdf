//! Pull identifiable resources out of execution results.

use chrono::{DateTime, Utc};
use opspilot_core::{Capability, ExecutionResult, ResourceEntity, ResourceKind};
use serde_json::{Map, Value};

/// Detail fields worth remembering, per kind.
fn detail_fields(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Pod => &["phase", "status", "ip", "namespace", "node"],
        ResourceKind::Node => &["status", "internal_ip", "ip", "roles"],
        ResourceKind::Container => &["image", "status", "id"],
        ResourceKind::Deployment => &["namespace", "replicas", "ready"],
        ResourceKind::Service => &["namespace", "type", "cluster_ip"],
        ResourceKind::Namespace => &["status"],
    }
}

/// Entities and ordered listings found in one result.
#[derive(Debug, Default)]
pub struct Observations {
    pub entities: Vec<ResourceEntity>,
    /// Listing order per kind, when the result was a list.
    pub lists: Vec<(ResourceKind, Vec<String>)>,
}

impl Observations {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.lists.is_empty()
    }
}

/// Extract entities from a successful result of `capability`.
///
/// List operations (`list_pods`, `list_containers`, ...) yield one entity per
/// item; batch describe aggregates yield one per described resource.
pub fn extract_observations(
    capability: &Capability,
    result: &ExecutionResult,
    observed_at: DateTime<Utc>,
) -> Observations {
    let mut observations = Observations::default();
    if !result.success {
        return observations;
    }

    let batch_kind = result
        .get("_batch")
        .and_then(Value::as_bool)
        .filter(|b| *b)
        .and_then(|_| result.get("resource_type"))
        .and_then(Value::as_str)
        .and_then(ResourceKind::parse);

    let (kind, items) = match batch_kind {
        Some(kind) => (kind, result.items("resources")),
        None => {
            let Some(kind) = capability
                .operation
                .strip_prefix("list_")
                .and_then(ResourceKind::parse)
            else {
                return observations;
            };
            (kind, result.items(kind.plural()))
        }
    };

    let Some(items) = items else {
        return observations;
    };

    let mut names = Vec::with_capacity(items.len());
    for item in items {
        let (name, details) = match item {
            Value::String(name) => (name.clone(), Map::new()),
            Value::Object(obj) => {
                let Some(name) = obj.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let details = detail_fields(kind)
                    .iter()
                    .filter_map(|f| obj.get(*f).map(|v| (f.to_string(), v.clone())))
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                (name.to_string(), details)
            }
            _ => continue,
        };
        names.push(name.clone());
        observations.entities.push(ResourceEntity {
            name,
            kind,
            details,
            observed_at,
        });
    }

    if !names.is_empty() {
        observations.lists.push((kind, names));
    }
    observations
}
