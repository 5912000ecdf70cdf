//! Capability registry: the catalog of operations a turn can invoke.
//!
//! Every capability is bound to exactly one [`BackendGroup`] when it is
//! registered. Names are derived from the group and a group-independent
//! operation key (`remote` + `list_pods` → `remote_list_pods`), so the same
//! operation on the local and remote cluster forms an ambiguous pair that
//! the disambiguation stage can swap between without inspecting strings.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Backend a capability executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendGroup {
    /// Container engine on the operator's machine.
    Engine,
    /// Cluster running locally.
    LocalCluster,
    /// Remote (shared) cluster.
    RemoteCluster,
}

impl BackendGroup {
    pub fn all() -> &'static [BackendGroup] {
        &[Self::Engine, Self::LocalCluster, Self::RemoteCluster]
    }

    /// Name prefix used when the capability is registered.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Engine => "docker",
            Self::LocalCluster => "local",
            Self::RemoteCluster => "remote",
        }
    }

    /// Upper-case scope label used in rendered output.
    pub fn scope_label(&self) -> &'static str {
        match self {
            Self::Engine => "ENGINE",
            Self::LocalCluster => "LOCAL",
            Self::RemoteCluster => "REMOTE",
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::LocalCluster | Self::RemoteCluster)
    }

    /// The other cluster group, if this is a cluster.
    pub fn other_cluster(&self) -> Option<BackendGroup> {
        match self {
            Self::LocalCluster => Some(Self::RemoteCluster),
            Self::RemoteCluster => Some(Self::LocalCluster),
            Self::Engine => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "engine" | "docker" => Some(Self::Engine),
            "local" | "local_cluster" => Some(Self::LocalCluster),
            "remote" | "remote_cluster" => Some(Self::RemoteCluster),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::LocalCluster => write!(f, "local_cluster"),
            Self::RemoteCluster => write!(f, "remote_cluster"),
        }
    }
}

/// Whether a capability changes backend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Mutate,
}

/// JSON type of a single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
    Array,
}

impl ArgKind {
    fn schema_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }
}

/// One declared argument of a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    pub kind: ArgKind,
    pub description: String,
    pub required: bool,
}

/// A named operation with an argument schema and a backend group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    /// Group-independent operation key (`list_pods`).
    pub operation: String,
    pub description: String,
    pub backend_group: BackendGroup,
    pub access: Access,
    pub arguments: Vec<ArgumentSpec>,
    #[serde(rename = "argumentSchema")]
    pub argument_schema: Value,
    #[serde(rename = "requiredArgs")]
    pub required_args: BTreeSet<String>,
}

impl Capability {
    /// Start building a read-only capability.
    pub fn builder(
        group: BackendGroup,
        operation: &str,
        description: &str,
    ) -> CapabilityBuilder {
        CapabilityBuilder {
            group,
            operation: operation.to_string(),
            description: description.to_string(),
            access: Access::Read,
            arguments: Vec::new(),
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.access == Access::Mutate
    }

    /// Compact description for model prompts.
    pub fn prompt_entry(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.argument_schema,
        })
    }
}

/// Builder for [`Capability`]; the schema is derived on [`build`](Self::build).
pub struct CapabilityBuilder {
    group: BackendGroup,
    operation: String,
    description: String,
    access: Access,
    arguments: Vec<ArgumentSpec>,
}

impl CapabilityBuilder {
    pub fn required(mut self, name: &str, kind: ArgKind, description: &str) -> Self {
        self.arguments.push(ArgumentSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ArgKind, description: &str) -> Self {
        self.arguments.push(ArgumentSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        });
        self
    }

    pub fn mutating(mut self) -> Self {
        self.access = Access::Mutate;
        self
    }

    pub fn build(self) -> Capability {
        let mut properties = Map::new();
        for arg in &self.arguments {
            properties.insert(
                arg.name.clone(),
                json!({"type": arg.kind.schema_type(), "description": arg.description}),
            );
        }
        let required_args: BTreeSet<String> = self
            .arguments
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name.clone())
            .collect();
        let argument_schema = json!({
            "type": "object",
            "properties": properties,
            "required": required_args.iter().collect::<Vec<_>>(),
        });

        Capability {
            name: format!("{}_{}", self.group.prefix(), self.operation),
            operation: self.operation,
            description: self.description,
            backend_group: self.group,
            access: self.access,
            arguments: self.arguments,
            argument_schema,
            required_args,
        }
    }
}

/// Why a resolved call was rejected by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Capability '{0}' does not exist.")]
    UnknownCapability(String),

    #[error("Capability '{capability}' is missing required argument: '{argument}'.")]
    MissingArgument { capability: String, argument: String },
}

/// Immutable catalog of capabilities, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
    by_name: HashMap<String, usize>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in catalog.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for capability in builtin_catalog() {
            registry.register(capability)?;
        }
        Ok(registry)
    }

    /// Add a capability. Malformed schemas and duplicate names are errors.
    pub fn register(&mut self, capability: Capability) -> Result<()> {
        if capability.operation.trim().is_empty() {
            return Err(Error::Registry(format!(
                "capability '{}' has an empty operation",
                capability.name
            )));
        }
        if self.by_name.contains_key(&capability.name) {
            return Err(Error::Registry(format!(
                "duplicate capability '{}'",
                capability.name
            )));
        }

        let mut seen = BTreeSet::new();
        for arg in &capability.arguments {
            if arg.name.trim().is_empty() || !seen.insert(arg.name.as_str()) {
                return Err(Error::Registry(format!(
                    "capability '{}' declares argument '{}' twice or empty",
                    capability.name, arg.name
                )));
            }
        }
        for required in &capability.required_args {
            if !seen.contains(required.as_str()) {
                return Err(Error::Registry(format!(
                    "capability '{}' requires undeclared argument '{}'",
                    capability.name, required
                )));
            }
        }
        if capability.argument_schema.get("properties").map(Value::is_object) != Some(true) {
            return Err(Error::Registry(format!(
                "capability '{}' schema has no properties object",
                capability.name
            )));
        }

        self.by_name
            .insert(capability.name.clone(), self.capabilities.len());
        self.capabilities.push(capability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.by_name.get(name).map(|&i| &self.capabilities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// The capability for an operation on a specific group.
    pub fn variant(&self, operation: &str, group: BackendGroup) -> Option<&Capability> {
        self.get(&format!("{}_{}", group.prefix(), operation))
    }

    /// Same operation on the other cluster group, when both exist.
    pub fn counterpart(&self, name: &str) -> Option<&Capability> {
        let capability = self.get(name)?;
        let other = capability.backend_group.other_cluster()?;
        self.variant(&capability.operation, other)
    }

    /// Whether the named capability has a same-operation twin on the other cluster.
    pub fn is_ambiguous(&self, name: &str) -> bool {
        self.counterpart(name).is_some()
    }

    /// Check that `name` exists and every required argument is present.
    pub fn validate(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<&Capability, ValidationError> {
        let capability = self
            .get(name)
            .ok_or_else(|| ValidationError::UnknownCapability(name.to_string()))?;

        for required in &capability.required_args {
            match arguments.get(required) {
                Some(v) if !v.is_null() => {}
                _ => {
                    return Err(ValidationError::MissingArgument {
                        capability: name.to_string(),
                        argument: required.clone(),
                    })
                }
            }
        }
        Ok(capability)
    }
}

// ---------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------

fn builtin_catalog() -> Vec<Capability> {
    use ArgKind::*;
    use BackendGroup::*;

    let mut catalog = vec![
        Capability::builder(Engine, "list_containers", "List containers on the local container engine")
            .optional("all", Boolean, "Include stopped containers")
            .optional("limit", Integer, "Maximum number of containers")
            .build(),
        Capability::builder(Engine, "container_details", "Inspect a container (config, state, mounts)")
            .required("container_name_or_id", String, "Container name or ID")
            .build(),
        Capability::builder(Engine, "container_logs", "Fetch recent logs of a container")
            .required("container_name_or_id", String, "Container name or ID")
            .optional("tail", Integer, "Number of lines from the end")
            .build(),
        Capability::builder(Engine, "start_container", "Start a stopped container")
            .required("container_name_or_id", String, "Container name or ID")
            .mutating()
            .build(),
        Capability::builder(Engine, "stop_container", "Stop a running container")
            .required("container_name_or_id", String, "Container name or ID")
            .mutating()
            .build(),
        Capability::builder(Engine, "restart_container", "Restart a container")
            .required("container_name_or_id", String, "Container name or ID")
            .mutating()
            .build(),
        Capability::builder(Engine, "run_container", "Create and start a container from an image")
            .required("image", String, "Image reference")
            .optional("name", String, "Container name")
            .optional("ports", String, "Port mapping, host:container")
            .mutating()
            .build(),
        Capability::builder(Engine, "stop_all_containers", "Stop every running container")
            .mutating()
            .build(),
    ];

    for group in [LocalCluster, RemoteCluster] {
        let scope = if group == LocalCluster { "local" } else { "remote" };
        catalog.extend([
            Capability::builder(group, "list_pods", &format!("List pods in the {} cluster", scope))
                .optional("namespace", String, "Namespace, default 'default'")
                .optional("status_phase", String, "Filter by phase (Running, Pending, Failed)")
                .optional("limit", Integer, "Maximum number of pods")
                .build(),
            Capability::builder(group, "list_nodes", &format!("List nodes of the {} cluster", scope))
                .optional("limit", Integer, "Maximum number of nodes")
                .build(),
            Capability::builder(group, "list_deployments", &format!("List deployments in the {} cluster", scope))
                .optional("namespace", String, "Namespace")
                .optional("limit", Integer, "Maximum number of deployments")
                .build(),
            Capability::builder(group, "list_services", &format!("List services in the {} cluster", scope))
                .optional("namespace", String, "Namespace")
                .optional("limit", Integer, "Maximum number of services")
                .build(),
            Capability::builder(group, "list_namespaces", &format!("List namespaces of the {} cluster", scope))
                .build(),
            Capability::builder(group, "describe_pod", &format!("Describe a pod in the {} cluster: status, events, containers", scope))
                .required("pod_name", String, "Pod name")
                .optional("namespace", String, "Namespace")
                .build(),
            Capability::builder(group, "describe_node", &format!("Describe a node of the {} cluster: conditions, capacity", scope))
                .required("node_name", String, "Node name")
                .build(),
            Capability::builder(group, "describe_deployment", &format!("Describe a deployment in the {} cluster: replicas, rollout", scope))
                .required("deployment_name", String, "Deployment name")
                .optional("namespace", String, "Namespace")
                .build(),
            Capability::builder(group, "describe_service", &format!("Describe a service in the {} cluster: ports, selector", scope))
                .required("service_name", String, "Service name")
                .optional("namespace", String, "Namespace")
                .build(),
            Capability::builder(group, "pod_logs", &format!("Fetch logs of a pod in the {} cluster", scope))
                .required("pod_name", String, "Pod name")
                .optional("namespace", String, "Namespace")
                .optional("tail_lines", Integer, "Number of lines from the end")
                .build(),
            Capability::builder(group, "restart_deployment", &format!("Rolling restart of a deployment in the {} cluster", scope))
                .required("deployment_name", String, "Deployment name")
                .optional("namespace", String, "Namespace")
                .mutating()
                .build(),
            Capability::builder(group, "scale_deployment", &format!("Scale a deployment in the {} cluster", scope))
                .required("deployment_name", String, "Deployment name")
                .required("replicas", Integer, "Desired replica count")
                .optional("namespace", String, "Namespace")
                .mutating()
                .build(),
            Capability::builder(group, "delete_pod", &format!("Delete a pod in the {} cluster", scope))
                .required("pod_name", String, "Pod name")
                .optional("namespace", String, "Namespace")
                .mutating()
                .build(),
        ]);
    }

    catalog.extend([
        Capability::builder(RemoteCluster, "find_resource_namespace", "Find which namespace a named resource lives in")
            .required("name", String, "Resource name")
            .build(),
        Capability::builder(RemoteCluster, "list_events", "List recent events for a pod")
            .required("pod_name", String, "Pod name")
            .optional("namespace", String, "Namespace")
            .build(),
        Capability::builder(RemoteCluster, "analyze_utilization", "Analyze CPU and memory utilization against requests")
            .optional("namespace", String, "Namespace")
            .optional("risk_threshold", Integer, "Utilization percent considered risky")
            .build(),
        Capability::builder(RemoteCluster, "promote_resource", "Copy a resource definition from the local cluster to the remote cluster")
            .required("resource_type", String, "pod, deployment, service, configmap or secret")
            .required("name", String, "Resource name")
            .optional("namespace", String, "Namespace")
            .mutating()
            .build(),
    ]);

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_loads() {
        let registry = CapabilityRegistry::builtin().unwrap();
        assert!(registry.len() > 30);
        let cap = registry.get("remote_list_pods").unwrap();
        assert_eq!(cap.backend_group, BackendGroup::RemoteCluster);
        assert_eq!(cap.operation, "list_pods");
        assert!(registry.contains("docker_stop_container"));
    }

    #[test]
    fn test_counterpart_and_ambiguity() {
        let registry = CapabilityRegistry::builtin().unwrap();
        assert_eq!(
            registry.counterpart("local_list_pods").map(|c| c.name.as_str()),
            Some("remote_list_pods")
        );
        assert!(registry.is_ambiguous("remote_describe_node"));
        // Remote-only and engine capabilities have no twin.
        assert!(!registry.is_ambiguous("remote_list_events"));
        assert!(!registry.is_ambiguous("docker_list_containers"));
    }

    #[test]
    fn test_validate_missing_argument() {
        let registry = CapabilityRegistry::builtin().unwrap();
        let args = Map::new();
        let err = registry.validate("local_describe_pod", &args).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Capability 'local_describe_pod' is missing required argument: 'pod_name'."
        );

        let mut args = Map::new();
        args.insert("pod_name".into(), json!("web-1"));
        assert!(registry.validate("local_describe_pod", &args).is_ok());
    }

    #[test]
    fn test_validate_unknown_capability() {
        let registry = CapabilityRegistry::builtin().unwrap();
        let err = registry.validate("k8s_explode", &Map::new()).unwrap_err();
        assert_eq!(err, ValidationError::UnknownCapability("k8s_explode".into()));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = CapabilityRegistry::new();
        let cap = Capability::builder(BackendGroup::Engine, "list_containers", "x").build();
        registry.register(cap.clone()).unwrap();
        assert!(registry.register(cap).is_err());
    }

    #[test]
    fn test_register_rejects_undeclared_required() {
        let mut cap = Capability::builder(BackendGroup::Engine, "inspect", "x").build();
        cap.required_args.insert("ghost".into());
        let mut registry = CapabilityRegistry::new();
        assert!(matches!(registry.register(cap), Err(Error::Registry(_))));
    }

    #[test]
    fn test_schema_lists_required() {
        let cap = Capability::builder(BackendGroup::LocalCluster, "describe_node", "x")
            .required("node_name", ArgKind::String, "Node")
            .build();
        assert_eq!(cap.name, "local_describe_node");
        assert_eq!(cap.argument_schema["required"], json!(["node_name"]));
        assert_eq!(cap.argument_schema["properties"]["node_name"]["type"], "string");
    }
}
