//! Batch-level safety gate.

use std::sync::Arc;

use opspilot_core::{CapabilityRegistry, ResolvedCall, RiskAssessment};
use tracing::{debug, warn};

use crate::policy::SafetyPolicy;

/// Outcome of gating one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Nothing dangerous; dispatch the whole batch.
    Clear,
    /// Dispatch nothing; ask the operator to approve this call.
    Hold(RiskAssessment),
}

pub struct SafetyGate {
    registry: Arc<CapabilityRegistry>,
    policy: Arc<dyn SafetyPolicy>,
    enabled: bool,
}

impl SafetyGate {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        policy: Arc<dyn SafetyPolicy>,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            policy,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Assess every call; the first dangerous one holds the batch.
    pub fn check(&self, calls: &[ResolvedCall]) -> GateDecision {
        if !self.enabled {
            return GateDecision::Clear;
        }
        for call in calls {
            // Unknown names fail at dispatch instead.
            let Some(capability) = self.registry.get(&call.capability) else {
                continue;
            };
            let assessment = self.policy.assess(capability, call);
            if assessment.is_dangerous {
                warn!("Action requires approval: {} ({})", call.capability, assessment.reason);
                return GateDecision::Hold(assessment);
            }
        }
        debug!("Safety gate clear for {} calls", calls.len());
        GateDecision::Clear
    }
}
