//! Risk assessment of individual calls.

use std::collections::BTreeSet;

use opspilot_core::{Capability, CapabilityRegistry, ResolvedCall, RiskAssessment};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

/// Decides whether one call needs approval.
pub trait SafetyPolicy: Send + Sync {
    fn assess(&self, capability: &Capability, call: &ResolvedCall) -> RiskAssessment;
}

/// Flags capabilities registered as mutating, adjustable at runtime.
#[derive(Default)]
pub struct DefaultSafetyPolicy {
    added: RwLock<BTreeSet<String>>,
    removed: RwLock<BTreeSet<String>>,
}

impl DefaultSafetyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require approval for `name` even if it is read-only.
    pub fn add_dangerous(&self, name: &str) {
        self.removed.write().remove(name);
        self.added.write().insert(name.to_string());
        info!("Added '{}' to dangerous capabilities", name);
    }

    /// Stop requiring approval for `name`.
    pub fn remove_dangerous(&self, name: &str) {
        self.added.write().remove(name);
        self.removed.write().insert(name.to_string());
        info!("Removed '{}' from dangerous capabilities", name);
    }

    pub fn is_dangerous(&self, capability: &Capability) -> bool {
        if self.removed.read().contains(&capability.name) {
            return false;
        }
        capability.is_mutating() || self.added.read().contains(&capability.name)
    }

    /// Names of every registered capability that currently needs approval.
    pub fn dangerous_capabilities(&self, registry: &CapabilityRegistry) -> Vec<String> {
        registry
            .iter()
            .filter(|c| self.is_dangerous(c))
            .map(|c| c.name.clone())
            .collect()
    }
}

impl SafetyPolicy for DefaultSafetyPolicy {
    fn assess(&self, capability: &Capability, call: &ResolvedCall) -> RiskAssessment {
        if self.is_dangerous(capability) {
            RiskAssessment::dangerous(call, explain(capability, call))
        } else {
            RiskAssessment::safe(call)
        }
    }
}

/// What the call acts on, e.g. `container 'redis'`.
fn target(call: &ResolvedCall) -> String {
    let named = [
        ("container_name_or_id", "container"),
        ("pod_name", "pod"),
        ("deployment_name", "deployment"),
        ("service_name", "service"),
        ("node_name", "node"),
    ];
    for (arg, noun) in named {
        if let Some(name) = call.arg_str(arg) {
            return format!("{} '{}'", noun, name);
        }
    }
    match (call.arg_str("resource_type"), call.arg_str("name")) {
        (Some(kind), Some(name)) => format!("{} '{}'", kind, name),
        (None, Some(name)) => format!("'{}'", name),
        _ => "the target".to_string(),
    }
}

fn explain(capability: &Capability, call: &ResolvedCall) -> String {
    let verb = capability.operation.split('_').next().unwrap_or_default();
    let target = target(call);
    match verb {
        "stop" if capability.operation.contains("all") => {
            "This will STOP every running container. Data in non-persistent volumes may be lost."
                .to_string()
        }
        "stop" => format!(
            "This will STOP {} and any processes inside it. Data in non-persistent volumes may be lost.",
            target
        ),
        "start" => format!("This will START {}; it will consume resources and may bind ports.", target),
        "run" => {
            let image = call.arg_str("image").unwrap_or("unknown");
            let mut reason = format!("This will START a new container from image '{}'.", image);
            if let Some(ports) = call.arguments.get("ports").filter(|p| !p.is_null()) {
                let ports = match ports {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                reason.push_str(&format!(" Port mappings: {}.", ports));
            }
            reason
        }
        "restart" => format!("This will RESTART {}; it is briefly unavailable.", target),
        "delete" => format!("This will DELETE {}. Its local state is lost.", target),
        "scale" => match call.arguments.get("replicas") {
            Some(replicas) => format!("This will SCALE {} to {} replicas.", target, replicas),
            None => format!("This will SCALE {}.", target),
        },
        "promote" => format!("This will copy {} from the local cluster to the remote cluster.", target),
        _ => format!("{} changes infrastructure state.", capability.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::builtin().unwrap()
    }

    fn call(name: &str, args: Value) -> ResolvedCall {
        ResolvedCall::new(name, args.as_object().cloned().unwrap())
    }

    #[test]
    fn test_mutating_capabilities_are_dangerous() {
        let registry = registry();
        let policy = DefaultSafetyPolicy::new();
        let stop = call("docker_stop_container", json!({"container_name_or_id": "redis"}));
        let assessment = policy.assess(registry.get("docker_stop_container").unwrap(), &stop);
        assert!(assessment.is_dangerous);
        assert_eq!(assessment.capability, "docker_stop_container");
        assert!(assessment.reason.contains("STOP container 'redis'"));

        let list = call("remote_list_pods", json!({"namespace": "default"}));
        let assessment = policy.assess(registry.get("remote_list_pods").unwrap(), &list);
        assert!(!assessment.is_dangerous);
    }

    #[test]
    fn test_reasons_per_verb() {
        let registry = registry();
        let policy = DefaultSafetyPolicy::new();
        let cases = [
            ("docker_run_container", json!({"image": "nginx", "ports": "8080:80"}), "image 'nginx'"),
            ("remote_scale_deployment", json!({"deployment_name": "api", "replicas": 3}), "to 3 replicas"),
            ("local_delete_pod", json!({"pod_name": "web-1"}), "DELETE pod 'web-1'"),
            ("remote_promote_resource", json!({"resource_type": "deployment", "name": "api"}), "deployment 'api'"),
            ("docker_stop_all_containers", json!({}), "every running container"),
        ];
        for (name, args, expected) in cases {
            let assessment = policy.assess(registry.get(name).unwrap(), &call(name, args));
            assert!(assessment.is_dangerous, "{}", name);
            assert!(assessment.reason.contains(expected), "{}: {}", name, assessment.reason);
        }
    }

    #[test]
    fn test_add_and_remove_dangerous() {
        let registry = registry();
        let policy = DefaultSafetyPolicy::new();
        let logs = registry.get("docker_container_logs").unwrap();
        let stop = registry.get("docker_stop_container").unwrap();

        assert!(!policy.is_dangerous(logs));
        policy.add_dangerous("docker_container_logs");
        assert!(policy.is_dangerous(logs));

        policy.remove_dangerous("docker_stop_container");
        assert!(!policy.is_dangerous(stop));
        policy.add_dangerous("docker_stop_container");
        assert!(policy.is_dangerous(stop));

        let dangerous = policy.dangerous_capabilities(&registry);
        assert!(dangerous.contains(&"docker_container_logs".to_string()));
        assert!(!dangerous.contains(&"remote_list_pods".to_string()));
    }
}
