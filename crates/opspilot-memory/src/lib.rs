//! Short-lived memory of what the operator has recently seen.
//!
//! `EpisodicMemory` keeps per-session resource entities with a TTL and is
//! pruned lazily on read. `InfrastructureIndex` is the coarse, cross-session
//! map of known resource names per backend group, fed by the background pulse.
//! Both are advisory: a missing or stale entry never fails a turn.

pub mod episodic;
pub mod extract;
pub mod index;

pub use episodic::{EpisodicMemory, MemorySnapshot};
pub use extract::{extract_observations, Observations};
pub use index::{GroupStatus, IndexEntry, InfrastructureIndex};
