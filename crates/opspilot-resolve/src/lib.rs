//! Resolvers that turn an operator request into capability calls.
//!
//! The cascade tries, in order: precompiled phrase patterns, the response
//! cache, and finally a language model prompted with a shortlist of relevant
//! capabilities. Model output goes through a single fallible decode step.
//! Disambiguation then settles calls that exist on both clusters.

pub mod cascade;
pub mod decode;
pub mod disambiguate;
pub mod hints;
pub mod patterns;
pub mod prompt;
pub mod retry;
pub mod shortlist;
pub mod types;

pub use cascade::IntentCascade;
pub use decode::{decode_calls, ParseError};
pub use disambiguate::{Disambiguation, Disambiguator, GroupSignal};
pub use patterns::PatternRouter;
pub use retry::{RetryPolicy, RetryState};
pub use shortlist::Shortlister;
pub use types::*;
