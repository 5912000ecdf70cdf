//! Stage C: narrow the registry to the capabilities relevant to a query.
//!
//! Capability texts are embedded once at construction. Scores blend cosine
//! similarity with lexical overlap; with no embedder the lexical score
//! alone decides.

use std::collections::BTreeSet;
use std::sync::Arc;

use ndarray::Array1;
use opspilot_core::{Capability, CapabilityRegistry};
use opspilot_infer::{cosine_similarity, EmbedderBackend};
use tracing::debug;

const SEMANTIC_WEIGHT: f32 = 0.7;
const LEXICAL_WEIGHT: f32 = 0.3;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "for", "to", "me", "my", "is", "are", "what", "show",
    "please", "can", "you", "and", "with", "from", "all",
];

struct Candidate {
    name: String,
    embedding: Option<Array1<f32>>,
    tokens: BTreeSet<String>,
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(|t| t.strip_suffix('s').filter(|s| s.len() > 2).unwrap_or(t).to_string())
        .collect()
}

fn capability_text(capability: &Capability) -> String {
    let args: Vec<&str> = capability.arguments.iter().map(|a| a.name.as_str()).collect();
    format!(
        "{} {} {} {}",
        capability.name,
        capability.operation.replace('_', " "),
        capability.description,
        args.join(" ")
    )
}

/// Relevance ranking over capability descriptions.
pub struct Shortlister {
    embedder: Arc<dyn EmbedderBackend>,
    candidates: Vec<Candidate>,
}

impl Shortlister {
    pub fn new(registry: &CapabilityRegistry, embedder: Arc<dyn EmbedderBackend>) -> Self {
        let candidates = registry
            .iter()
            .map(|capability| {
                let text = capability_text(capability);
                Candidate {
                    name: capability.name.clone(),
                    embedding: embedder.embed(&text).map(|r| r.embedding),
                    tokens: tokens(&text),
                }
            })
            .collect();
        Self { embedder, candidates }
    }

    /// Names of the `limit` most relevant capabilities, best first.
    pub fn shortlist(&self, query: &str, limit: usize) -> Vec<String> {
        let query_tokens = tokens(query);
        let query_vec = self.embedder.embed(query).map(|r| r.embedding);

        let mut scored: Vec<(f32, &str)> = self
            .candidates
            .iter()
            .map(|c| {
                let lexical = if query_tokens.is_empty() {
                    0.0
                } else {
                    query_tokens.intersection(&c.tokens).count() as f32 / query_tokens.len() as f32
                };
                let score = match (&query_vec, &c.embedding) {
                    (Some(q), Some(v)) => {
                        SEMANTIC_WEIGHT * cosine_similarity(q, v) + LEXICAL_WEIGHT * lexical
                    }
                    _ => lexical,
                };
                (score, c.name.as_str())
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        let names: Vec<String> = scored
            .into_iter()
            .take(limit.max(1))
            .map(|(_, name)| name.to_string())
            .collect();
        debug!("Shortlisted {} capabilities: {:?}", names.len(), names);
        names
    }
}
