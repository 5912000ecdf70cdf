//! Safety protocol: which calls need operator approval before dispatch.
//!
//! A `SafetyPolicy` assesses one call; the `SafetyGate` applies it to a
//! whole batch and holds the batch on the first dangerous call.

pub mod gate;
pub mod policy;

pub use gate::{GateDecision, SafetyGate};
pub use policy::{DefaultSafetyPolicy, SafetyPolicy};
