//! Human-readable rendering of call outcomes.

use opspilot_core::{Capability, CapabilityRegistry, ExecutionResult};
use serde_json::Value;

use crate::types::CallOutcome;

/// Longest full-detail block rendered per batch item.
const DETAIL_LIMIT: usize = 2000;
/// Longest generic JSON dump.
const GENERIC_LIMIT: usize = 4000;
const EVENTS_COLUMN: usize = 40;
const CONDITIONS_COLUMN: usize = 30;

/// Render every outcome, in order, separated by blank lines.
pub fn render_outcomes(registry: &CapabilityRegistry, outcomes: &[CallOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| render_outcome(registry, o))
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

pub fn render_outcome(registry: &CapabilityRegistry, outcome: &CallOutcome) -> String {
    let name = &outcome.source_call.capability;
    let result = &outcome.result;
    if !result.success {
        return format!(
            "Error from {}: {}",
            name,
            result.error.as_deref().unwrap_or("Unknown error")
        );
    }
    if result.get("_batch").and_then(Value::as_bool) == Some(true) {
        return render_batch(result);
    }
    let Some(capability) = registry.get(name) else {
        return render_generic(name, result);
    };

    match capability.operation.as_str() {
        "list_pods" => render_pods(capability, outcome),
        "list_nodes" => render_nodes(capability, result),
        "list_containers" => render_containers(result),
        "list_deployments" | "list_services" | "list_namespaces" => render_names(capability, result),
        "container_logs" | "pod_logs" => render_logs(name, result),
        op if op.starts_with("describe_") || op == "container_details" => render_describe(result),
        _ => render_generic(name, result),
    }
}

fn str_field<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| item.get(*k).and_then(Value::as_str))
}

fn cell(item: &Value, keys: &[&str], fallback: &str) -> String {
    for key in keys {
        match item.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            Some(Value::Bool(b)) => return b.to_string(),
            _ => {}
        }
    }
    fallback.to_string()
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// `Running: 2, Failed: 1` in first-seen order.
fn summarize<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    counts
        .iter()
        .map(|(v, n)| format!("{}: {}", v, n))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let escape = |s: &str| s.replace('|', "\\|").replace('\n', " ");
    let mut out = format!("| {} |\n", headers.join(" | "));
    out.push_str(&format!("|{}\n", "---|".repeat(headers.len())));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| escape(c)).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out.trim_end().to_string()
}

fn items(result: &ExecutionResult, key: &str) -> Vec<Value> {
    result.items(key).cloned().unwrap_or_default()
}

// ---------------------------------------------------------------
// Per-capability renderers
// ---------------------------------------------------------------

fn render_pods(capability: &Capability, outcome: &CallOutcome) -> String {
    let result = &outcome.result;
    let scope = capability.backend_group.scope_label();
    let namespace = result
        .get("namespace")
        .and_then(Value::as_str)
        .or_else(|| outcome.source_call.arg_str("namespace"))
        .unwrap_or("default");
    let pods = items(result, "pods");
    if pods.is_empty() {
        return format!("No pods found in namespace '{}' ({}).", namespace, scope);
    }

    let summary = summarize(pods.iter().map(|p| str_field(p, &["phase"]).unwrap_or("Unknown")));
    let rows: Vec<Vec<String>> = pods
        .iter()
        .map(|p| {
            vec![
                cell(p, &["phase"], "Unknown"),
                cell(p, &["name"], "?"),
                cell(p, &["restarts"], "0"),
                cell(p, &["age"], "?"),
                cell(p, &["node"], "?"),
            ]
        })
        .collect();
    format!(
        "Pods in '{}' ({})\nSummary: {}\n\n{}",
        namespace,
        scope,
        summary,
        markdown_table(&["Status", "Name", "Restarts", "Age", "Node"], &rows)
    )
}

fn render_nodes(capability: &Capability, result: &ExecutionResult) -> String {
    let scope = capability.backend_group.scope_label();
    let nodes = items(result, "nodes");
    if nodes.is_empty() {
        return format!("No nodes found ({}).", scope);
    }

    let summary = summarize(nodes.iter().map(|n| str_field(n, &["status"]).unwrap_or("Unknown")));
    let rows: Vec<Vec<String>> = nodes
        .iter()
        .map(|n| {
            let roles = match n.get("roles") {
                Some(Value::Array(roles)) => roles
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            vec![
                cell(n, &["status"], "Unknown"),
                cell(n, &["name"], "?"),
                roles,
                cell(n, &["kubelet_version", "version"], "?"),
                cell(n, &["internal_ip", "ip"], "?"),
            ]
        })
        .collect();
    format!(
        "Nodes ({})\nSummary: {}\n\n{}",
        scope,
        summary,
        markdown_table(&["Status", "Name", "Roles", "Version", "Internal-IP"], &rows)
    )
}

fn render_containers(result: &ExecutionResult) -> String {
    let containers = items(result, "containers");
    if containers.is_empty() {
        return "No containers found.".into();
    }
    let rows: Vec<Vec<String>> = containers
        .iter()
        .map(|c| match c {
            Value::String(name) => vec!["?".into(), name.clone(), "?".into(), "?".into()],
            other => vec![
                cell(other, &["status", "state"], "?"),
                cell(other, &["name"], "?"),
                cell(other, &["image"], "?"),
                truncate(&cell(other, &["id"], "?"), 12),
            ],
        })
        .collect();
    format!(
        "Containers ({})\n\n{}",
        containers.len(),
        markdown_table(&["Status", "Name", "Image", "ID"], &rows)
    )
}

/// Deployments, services, namespaces: a bullet list of names.
fn render_names(capability: &Capability, result: &ExecutionResult) -> String {
    let kind = capability
        .operation
        .strip_prefix("list_")
        .unwrap_or(&capability.operation);
    let scope = capability.backend_group.scope_label();
    let entries = items(result, kind);
    if entries.is_empty() {
        return format!("No {} found ({}).", kind, scope);
    }
    let lines: Vec<String> = entries
        .iter()
        .map(|e| match e {
            Value::String(name) => format!("- {}", name),
            other => {
                let name = cell(other, &["name"], "?");
                match str_field(other, &["namespace"]) {
                    Some(ns) if kind != "namespaces" => format!("- {} ({})", name, ns),
                    _ => format!("- {}", name),
                }
            }
        })
        .collect();
    format!("{} {} ({})\n{}", entries.len(), kind, scope, lines.join("\n"))
}

fn render_logs(name: &str, result: &ExecutionResult) -> String {
    match result.get("logs").or_else(|| result.get("data")) {
        Some(Value::String(logs)) if logs.trim().is_empty() => format!("{}: no log output.", name),
        Some(Value::String(logs)) => format!("Logs:\n```\n{}\n```", logs.trim_end()),
        _ => render_generic(name, result),
    }
}

fn render_describe(result: &ExecutionResult) -> String {
    match result.get("data") {
        Some(Value::String(text)) => format!("Details:\n```yaml\n{}\n```", text.trim_end()),
        Some(other) => format!("Details:\n```json\n{}\n```", pretty(other)),
        None => format!(
            "Details:\n```json\n{}\n```",
            pretty(&Value::Object(result.payload.clone()))
        ),
    }
}

fn render_batch(result: &ExecutionResult) -> String {
    let resources = items(result, "resources");
    let kind = result
        .get("resource_type")
        .and_then(Value::as_str)
        .unwrap_or("resource");
    if resources.is_empty() {
        return format!("No {}s to describe.", kind);
    }
    let full_detail = result.get("_full_detail").and_then(Value::as_bool) == Some(true);

    if full_detail {
        let mut out = format!("Batch describe: {} {}s (full detail)\n\n", resources.len(), kind);
        for r in &resources {
            out.push_str(&format!(
                "---\n### {} ({})\n",
                cell(r, &["name"], "?"),
                cell(r, &["status"], "Unknown")
            ));
            if let Some(error) = str_field(r, &["error"]) {
                out.push_str(&format!("Error: {}\n", error));
            } else if let Some(details) = r.get("details") {
                match details {
                    Value::String(text) => {
                        out.push_str(&format!("```yaml\n{}\n```\n", truncate(text, DETAIL_LIMIT)))
                    }
                    other => out.push_str(&format!(
                        "```json\n{}\n```\n",
                        truncate(&pretty(other), DETAIL_LIMIT)
                    )),
                }
            }
        }
        return out.trim_end().to_string();
    }

    let summary = summarize(resources.iter().map(|r| str_field(r, &["status"]).unwrap_or("Unknown")));
    let rows: Vec<Vec<String>> = resources
        .iter()
        .map(|r| match str_field(r, &["error"]) {
            Some(error) => vec![
                "Error".into(),
                cell(r, &["name"], "?"),
                truncate(error, EVENTS_COLUMN),
                "-".into(),
            ],
            None => vec![
                cell(r, &["status"], "Unknown"),
                cell(r, &["name"], "?"),
                truncate(&cell(r, &["events"], "No events"), EVENTS_COLUMN),
                truncate(&cell(r, &["conditions"], "Unknown"), CONDITIONS_COLUMN),
            ],
        })
        .collect();
    format!(
        "Batch describe: {} {}s\nSummary: {}\n\n{}",
        resources.len(),
        kind,
        summary,
        markdown_table(&["Status", "Name", "Events", "Conditions"], &rows)
    )
}

fn render_generic(name: &str, result: &ExecutionResult) -> String {
    if let Some(message) = str_field(&Value::Object(result.payload.clone()), &["message", "data"]) {
        return message.to_string();
    }
    if result.payload.is_empty() {
        return format!("{} completed.", name);
    }
    format!(
        "{} result:\n```json\n{}\n```",
        name,
        truncate(&pretty(&Value::Object(result.payload.clone())), GENERIC_LIMIT)
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
