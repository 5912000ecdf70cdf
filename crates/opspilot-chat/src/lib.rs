//! Language-model access for intent resolution.
//!
//! Streams completions from external APIs (or a local Ollama server) and
//! exposes them through the `LanguageModel` trait, which the resolver
//! treats as an opaque `resolve(system, history, query) -> text` call.

pub mod config;
pub mod model;
pub mod providers;
pub mod types;

pub use config::{LLMConfig, ResolvedProvider};
pub use model::{CompletionRequest, HttpLanguageModel, LanguageModel};
pub use types::*;
