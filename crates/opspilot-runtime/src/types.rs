//! Runtime types.

use opspilot_core::{BackendGroup, ExecutionResult, ResolvedCall, RiskAssessment};
use opspilot_memory::GroupStatus;
use serde::Serialize;

/// One executed call, paired with the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallOutcome {
    #[serde(rename = "sourceCall")]
    pub source_call: ResolvedCall,
    pub result: ExecutionResult,
}

/// What the scheduler did with a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// Every call ran; outcomes are in input order.
    Executed(Vec<CallOutcome>),
    /// Nothing ran; this call needs approval first.
    Held(RiskAssessment),
}

/// Health of one backend group as last seen by the pulse.
#[derive(Debug, Clone, Serialize)]
pub struct GroupHealth {
    pub group: BackendGroup,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GroupStatus>,
}

/// Process-level runtime status.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub capabilities: usize,
    #[serde(rename = "activeSessions")]
    pub active_sessions: usize,
    #[serde(rename = "cacheEntries")]
    pub cache_entries: usize,
    #[serde(rename = "indexedResources")]
    pub indexed_resources: usize,
    #[serde(rename = "modelAvailable")]
    pub model_available: bool,
    #[serde(rename = "pulseRunning")]
    pub pulse_running: bool,
    pub backends: Vec<GroupHealth>,
}
