//! Response cache for resolved turns.
//!
//! Stores the rendered output and tool calls of successful turns so a
//! repeated or paraphrased request in the same backend-group context can be
//! answered without resolution or execution. Entries are LRU-evicted and
//! expire after a TTL. Default: 500 entries, 1-hour TTL.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array1;
use opspilot_core::{BackendGroup, ResolvedCall};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::embedder::{cosine_similarity, EmbedderBackend};

/// Filler removed before matching.
const FILLER_PREFIXES: &[&str] = &["please ", "can you ", "could you ", "would you "];

/// A previously answered turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedTurn {
    pub output: String,
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<ResolvedCall>,
}

/// Cached turn with its match keys.
struct CacheEntry {
    context: Option<BackendGroup>,
    embedding: Option<Array1<f32>>,
    identifiers: BTreeSet<String>,
    named: BTreeSet<BackendGroup>,
    turn: CachedTurn,
    inserted_at: Instant,
}

/// Thread-safe LRU response cache with similarity lookup.
pub struct ResponseCache {
    embedder: Arc<dyn EmbedderBackend>,
    threshold: f32,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: Vec<String>,
    max_size: usize,
    ttl: Duration,
}

/// Lower-case, drop trailing punctuation and polite filler, collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    let mut q = query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    while q.ends_with(['?', '.', '!']) {
        q.pop();
    }
    for prefix in FILLER_PREFIXES {
        if let Some(rest) = q.strip_prefix(prefix) {
            q = rest.to_string();
        }
    }
    q.trim().to_string()
}

/// Tokens that name concrete things (contain a digit, `-` or `_`).
/// A similarity hit must agree on all of them.
fn identifiers(normalized: &str) -> BTreeSet<String> {
    normalized
        .split(|c: char| c.is_whitespace() || c == ',' || c == '\'' || c == '"')
        .filter(|t| t.chars().any(|c| c.is_ascii_digit() || c == '-' || c == '_'))
        .map(str::to_string)
        .collect()
}

/// Clusters the text names by word. A similarity hit must name the same ones.
fn named_clusters(normalized: &str) -> BTreeSet<BackendGroup> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter_map(|word| match word {
            "remote" => Some(BackendGroup::RemoteCluster),
            "local" => Some(BackendGroup::LocalCluster),
            _ => None,
        })
        .collect()
}

fn cache_key(context: Option<BackendGroup>, normalized: &str) -> String {
    match context {
        Some(group) => format!("{}|{}", group, normalized),
        None => format!("-|{}", normalized),
    }
}

impl ResponseCache {
    /// Create a cache with the given capacity, TTL and similarity threshold.
    pub fn new(
        embedder: Arc<dyn EmbedderBackend>,
        max_size: usize,
        ttl: Duration,
        threshold: f32,
    ) -> Self {
        Self {
            embedder,
            threshold,
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(max_size),
                order: Vec::with_capacity(max_size),
                max_size: max_size.max(1),
                ttl,
            }),
        }
    }

    /// Look up a turn answered in the same backend-group context.
    pub fn lookup(&self, query: &str, context: Option<BackendGroup>) -> Option<CachedTurn> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return None;
        }
        let key = cache_key(context, &normalized);

        // Embed outside the lock.
        let embedding = self.embedder.embed(&normalized).map(|r| r.embedding);
        let wanted_ids = identifiers(&normalized);
        let wanted_named = named_clusters(&normalized);

        let mut inner = self.inner.lock();
        let ttl = inner.ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            inner.entries.remove(k);
        }
        if !expired.is_empty() {
            inner.order.retain(|k| !expired.contains(k));
        }

        let hit_key = if inner.entries.contains_key(&key) {
            Some(key)
        } else {
            let query_vec = embedding?;
            let threshold = self.threshold;
            inner
                .entries
                .iter()
                .filter(|(_, e)| {
                    e.context == context && e.identifiers == wanted_ids && e.named == wanted_named
                })
                .filter_map(|(k, e)| {
                    e.embedding
                        .as_ref()
                        .map(|v| (k, cosine_similarity(&query_vec, v)))
                })
                .filter(|(_, score)| *score >= threshold)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(k, score)| {
                    debug!("Response cache similarity hit ({:.3})", score);
                    k.clone()
                })
        }?;

        if let Some(pos) = inner.order.iter().position(|k| k == &hit_key) {
            let k = inner.order.remove(pos);
            inner.order.push(k);
        }
        inner.entries.get(&hit_key).map(|e| e.turn.clone())
    }

    /// Store a successfully completed turn.
    pub fn put(&self, query: &str, context: Option<BackendGroup>, turn: CachedTurn) {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return;
        }
        let key = cache_key(context, &normalized);
        let embedding = self.embedder.embed(&normalized).map(|r| r.embedding);
        let entry = CacheEntry {
            context,
            embedding,
            identifiers: identifiers(&normalized),
            named: named_clusters(&normalized),
            turn,
            inserted_at: Instant::now(),
        };

        let mut inner = self.inner.lock();

        // If already present, update and move to end
        if inner.entries.contains_key(&key) {
            inner.entries.insert(key.clone(), entry);
            inner.order.retain(|k| k != &key);
            inner.order.push(key);
            return;
        }

        // Evict oldest if at capacity
        while inner.entries.len() >= inner.max_size && !inner.order.is_empty() {
            let oldest = inner.order.remove(0);
            inner.entries.remove(&oldest);
        }

        inner.order.push(key.clone());
        inner.entries.insert(key, entry);
    }

    /// Number of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{HashingEmbedder, NoopEmbedder};

    fn turn(output: &str) -> CachedTurn {
        CachedTurn {
            output: output.into(),
            tool_calls: Vec::new(),
        }
    }

    fn hashing_cache(max: usize, ttl: Duration) -> ResponseCache {
        ResponseCache::new(Arc::new(HashingEmbedder::new(512)), max, ttl, 0.85)
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Please  List   Pods?! "), "list pods");
        assert_eq!(normalize_query("Could you show nodes."), "show nodes");
    }

    #[test]
    fn test_exact_hit_and_miss() {
        let cache = hashing_cache(10, Duration::from_secs(3600));
        assert!(cache.lookup("what is failing", None).is_none());

        cache.put("What is failing?", Some(BackendGroup::RemoteCluster), turn("two pods"));
        let hit = cache.lookup("what is failing", Some(BackendGroup::RemoteCluster));
        assert_eq!(hit.unwrap().output, "two pods");
    }

    #[test]
    fn test_paraphrase_hit() {
        let cache = hashing_cache(10, Duration::from_secs(3600));
        cache.put(
            "which pods are failing in the remote cluster right now",
            Some(BackendGroup::RemoteCluster),
            turn("answer"),
        );
        let hit = cache.lookup(
            "which pods are failing in the remote cluster now",
            Some(BackendGroup::RemoteCluster),
        );
        assert!(hit.is_some());
    }

    #[test]
    fn test_never_crosses_context() {
        let cache = hashing_cache(10, Duration::from_secs(3600));
        cache.put("why is the api slow", Some(BackendGroup::LocalCluster), turn("local"));
        assert!(cache
            .lookup("why is the api slow", Some(BackendGroup::RemoteCluster))
            .is_none());
        assert!(cache.lookup("why is the api slow", None).is_none());
    }

    #[test]
    fn test_identifiers_must_match() {
        let cache = hashing_cache(10, Duration::from_secs(3600));
        cache.put("why does web-1 keep restarting", None, turn("web-1"));
        assert!(cache.lookup("why does web-2 keep restarting", None).is_none());
    }

    #[test]
    fn test_named_cluster_must_match() {
        let cache = ResponseCache::new(
            Arc::new(HashingEmbedder::new(512)),
            10,
            Duration::from_secs(3600),
            0.5,
        );
        let context = Some(BackendGroup::RemoteCluster);
        cache.put(
            "which deployments are running in the remote cluster for the payments team right now",
            context,
            turn("remote deployments"),
        );
        assert!(cache
            .lookup(
                "which deployments are running in the local cluster for the payments team right now",
                context,
            )
            .is_none());
        assert!(cache
            .lookup(
                "which deployments are running in the remote cluster for the payments team now",
                context,
            )
            .is_some());
    }

    #[test]
    fn test_named_clusters() {
        let named = named_clusters("compare local and remote pods");
        assert_eq!(
            named.into_iter().collect::<Vec<_>>(),
            vec![BackendGroup::LocalCluster, BackendGroup::RemoteCluster]
        );
        assert!(named_clusters("remotely speaking").is_empty());
    }

    #[test]
    fn test_eviction() {
        let cache = hashing_cache(2, Duration::from_secs(3600));
        cache.put("alpha", None, turn("a"));
        cache.put("bravo", None, turn("b"));
        cache.put("charlie", None, turn("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("alpha", None).is_none());
        assert!(cache.lookup("charlie", None).is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = hashing_cache(10, Duration::from_millis(1));
        cache.put("ephemeral", None, turn("x"));

        // Sleep past TTL
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup("ephemeral", None).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_noop_embedder_exact_only() {
        let cache = ResponseCache::new(
            Arc::new(NoopEmbedder::new(8)),
            10,
            Duration::from_secs(60),
            0.5,
        );
        cache.put("show failing pods", None, turn("x"));
        assert!(cache.lookup("Show failing pods?", None).is_some());
        assert!(cache.lookup("show the failing pods", None).is_none());
    }
}
