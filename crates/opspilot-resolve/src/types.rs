//! Resolution results.

use opspilot_chat::ReasoningMode;
use opspilot_core::{BackendGroup, ResolvedCall, SessionMessage};
use opspilot_infer::CachedTurn;
use opspilot_memory::MemorySnapshot;
use serde::Serialize;

/// Cascade stage that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStage {
    Pattern,
    Cache,
    Model,
}

impl std::fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern => write!(f, "pattern"),
            Self::Cache => write!(f, "cache"),
            Self::Model => write!(f, "model"),
        }
    }
}

/// Outcome of one pass through the cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Stage A matched.
    Pattern(Vec<ResolvedCall>),
    /// Stage B hit; the turn is answered without execution.
    Cached(CachedTurn),
    /// Stage D produced valid calls after `requests` model calls.
    Model {
        calls: Vec<ResolvedCall>,
        mode: ReasoningMode,
        requests: u32,
    },
    /// Nothing actionable. Carries the last validation error and raw output.
    Unresolved {
        error: String,
        last_response: Option<String>,
    },
}

impl Resolution {
    pub fn stage(&self) -> Option<ResolutionStage> {
        match self {
            Self::Pattern(_) => Some(ResolutionStage::Pattern),
            Self::Cached(_) => Some(ResolutionStage::Cache),
            Self::Model { .. } => Some(ResolutionStage::Model),
            Self::Unresolved { .. } => None,
        }
    }

    /// Calls to execute; empty for cache hits and failures.
    pub fn calls(&self) -> &[ResolvedCall] {
        match self {
            Self::Pattern(calls) | Self::Model { calls, .. } => calls,
            Self::Cached(_) | Self::Unresolved { .. } => &[],
        }
    }

    pub fn into_calls(self) -> Vec<ResolvedCall> {
        match self {
            Self::Pattern(calls) | Self::Model { calls, .. } => calls,
            Self::Cached(_) | Self::Unresolved { .. } => Vec::new(),
        }
    }
}

/// Everything the cascade reads for one query.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub query: &'a str,
    pub history: &'a [SessionMessage],
    pub memory: &'a MemorySnapshot,
    /// Backend group of the session's last executed capability.
    pub cache_context: Option<BackendGroup>,
    pub live_context: Option<&'a str>,
    pub infrastructure: Option<&'a str>,
}

impl<'a> ResolveRequest<'a> {
    pub fn new(query: &'a str, history: &'a [SessionMessage], memory: &'a MemorySnapshot) -> Self {
        Self {
            query,
            history,
            memory,
            cache_context: None,
            live_context: None,
            infrastructure: None,
        }
    }
}
