//! Runtime orchestrator: runs one operator turn end to end.
//!
//! The `Orchestrator` owns every per-process store and threads a query
//! through resolution, disambiguation, the safety gate and the scheduler,
//! then renders the outcomes and feeds them back into memory. The
//! infrastructure pulse runs beside it as a cancellable background task.

pub mod context;
pub mod orchestrator;
pub mod pulse;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod types;

pub use context::LiveContextFetcher;
pub use orchestrator::Orchestrator;
pub use pulse::InfrastructurePulse;
pub use scheduler::{Prefetch, Scheduler};
pub use session::{InMemorySessionStore, SessionStore};
pub use types::*;
