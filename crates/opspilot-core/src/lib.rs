//! OpsPilot Core: capability registry, configuration, shared turn types.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod types;

pub use capabilities::{Access, BackendGroup, Capability, CapabilityRegistry, ValidationError};
pub use config::{DisambiguationMode, EndpointConfig, OpsPilotConfig};
pub use error::{Error, Result};
pub use types::*;
