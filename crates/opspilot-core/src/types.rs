//! Types shared across the turn pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kinds of infrastructure resource the pipeline knows how to list and describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Node,
    Deployment,
    Service,
    Namespace,
    Container,
}

impl ResourceKind {
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Node => "node",
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::Namespace => "namespace",
            Self::Container => "container",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Self::Pod => "pods",
            Self::Node => "nodes",
            Self::Deployment => "deployments",
            Self::Service => "services",
            Self::Namespace => "namespaces",
            Self::Container => "containers",
        }
    }

    /// Accepts singular or plural, any case.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let s = s.strip_suffix('s').unwrap_or(&s);
        match s {
            "pod" => Some(Self::Pod),
            "node" => Some(Self::Node),
            "deployment" => Some(Self::Deployment),
            "service" => Some(Self::Service),
            "namespace" => Some(Self::Namespace),
            "container" => Some(Self::Container),
            _ => None,
        }
    }

    /// Whether objects of this kind live inside a namespace.
    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::Pod | Self::Deployment | Self::Service)
    }

    /// Operation key listing this kind (`list_pods`).
    pub fn list_operation(&self) -> String {
        format!("list_{}", self.plural())
    }

    /// Operation key describing one object of this kind (`describe_pod`).
    pub fn describe_operation(&self) -> String {
        format!("describe_{}", self.singular())
    }

    /// Argument naming the object for describe-style operations (`pod_name`).
    pub fn name_argument(&self) -> String {
        format!("{}_name", self.singular())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.singular())
    }
}

/// Marks a list call whose results must be fanned out into per-item describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescribe {
    #[serde(rename = "resourceType")]
    pub resource_type: ResourceKind,
    #[serde(default, rename = "fullDetail")]
    pub full_detail: bool,
}

/// Execution hints attached by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFlags {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "batchDescribe")]
    pub batch_describe: Option<BatchDescribe>,
}

impl CallFlags {
    pub fn is_empty(&self) -> bool {
        self.batch_describe.is_none()
    }
}

/// A capability invocation produced by resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCall {
    #[serde(rename = "name")]
    pub capability: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "CallFlags::is_empty")]
    pub flags: CallFlags,
}

impl ResolvedCall {
    pub fn new(capability: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            capability: capability.into(),
            arguments,
            flags: CallFlags::default(),
        }
    }

    /// Same call, same arguments. Flags are ignored.
    pub fn same_invocation(&self, other: &ResolvedCall) -> bool {
        self.capability == other.capability && self.arguments == other.arguments
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Uniform outcome of one backend call. Failure is a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(payload: Map<String, Value>) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Map::new(),
            error: Some(error.into()),
        }
    }

    /// Interpret a backend response of the form `{success, ...payload}` or
    /// `{success: false, error}`. Non-object responses are wrapped as `data`.
    pub fn from_response(value: Value) -> Self {
        match value {
            Value::Object(mut obj) => {
                let error = obj.remove("error").and_then(|e| match e {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                });
                let success = obj
                    .remove("success")
                    .and_then(|s| s.as_bool())
                    .unwrap_or(error.is_none());
                Self {
                    success,
                    payload: obj,
                    error: if success { None } else { error.or_else(|| Some("Unknown error".into())) },
                }
            }
            other => {
                let mut payload = Map::new();
                payload.insert("data".into(), other);
                Self::ok(payload)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Payload array under `key`, if present.
    pub fn items(&self, key: &str) -> Option<&Vec<Value>> {
        self.payload.get(key).and_then(Value::as_array)
    }
}

/// Verdict of the safety policy on one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(rename = "isDangerous")]
    pub is_dangerous: bool,
    pub reason: String,
    pub capability: String,
    pub arguments: Map<String, Value>,
}

impl RiskAssessment {
    pub fn safe(call: &ResolvedCall) -> Self {
        Self {
            is_dangerous: false,
            reason: String::new(),
            capability: call.capability.clone(),
            arguments: call.arguments.clone(),
        }
    }

    pub fn dangerous(call: &ResolvedCall, reason: impl Into<String>) -> Self {
        Self {
            is_dangerous: true,
            reason: reason.into(),
            capability: call.capability.clone(),
            arguments: call.arguments.clone(),
        }
    }

    /// The call this assessment describes, for replay after approval.
    pub fn to_call(&self) -> ResolvedCall {
        ResolvedCall::new(self.capability.clone(), self.arguments.clone())
    }
}

/// A resource remembered from a previous result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntity {
    pub name: String,
    pub kind: ResourceKind,
    pub details: Map<String, Value>,
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
}

/// Speaker of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of a conversation's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Capabilities executed to produce this message (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl SessionMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            capabilities: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            capabilities,
        }
    }
}

/// The single value a transport renders for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnOutput {
    pub output: String,
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<ResolvedCall>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "confirmationRequest"
    )]
    pub confirmation_request: Option<RiskAssessment>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not", rename = "disambiguationNeeded")]
    pub disambiguation_needed: bool,
}

impl TurnOutput {
    pub fn message(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }
}
