//! Per-session episodic memory with lazy TTL pruning.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opspilot_core::{BackendGroup, ResourceEntity, ResourceKind};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

/// Ordered names from the last list of a kind, for ordinal references.
#[derive(Debug, Clone)]
struct RememberedList {
    names: Vec<String>,
    observed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionMemory {
    entities: HashMap<(ResourceKind, String), ResourceEntity>,
    lists: HashMap<ResourceKind, RememberedList>,
    last_group: Option<BackendGroup>,
    touched_at: DateTime<Utc>,
}

impl SessionMemory {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            entities: HashMap::new(),
            lists: HashMap::new(),
            last_group: None,
            touched_at: now,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>, ttl: chrono::Duration) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, e| now - e.observed_at <= ttl);
        self.lists.retain(|_, l| now - l.observed_at <= ttl);
        before - self.entities.len()
    }

    /// Nothing left to remember and untouched for longer than `ttl`.
    fn is_idle(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.entities.is_empty() && self.lists.is_empty() && now - self.touched_at > ttl
    }
}

/// Point-in-time view of one session's unexpired memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    /// Entities ordered by name, then kind.
    pub entities: Vec<ResourceEntity>,
    lists: HashMap<ResourceKind, Vec<String>>,
}

impl MemorySnapshot {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.lists.is_empty()
    }

    /// First entity with this name, in snapshot order.
    pub fn get(&self, name: &str) -> Option<&ResourceEntity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn get_kind(&self, kind: ResourceKind, name: &str) -> Option<&ResourceEntity> {
        self.entities.iter().find(|e| e.kind == kind && e.name == name)
    }

    /// Zero-based position in the last remembered list of `kind`.
    pub fn ordinal(&self, kind: ResourceKind, index: usize) -> Option<&str> {
        self.lists
            .get(&kind)
            .and_then(|names| names.get(index))
            .map(String::as_str)
    }

    /// Last entry of the last remembered list of `kind`.
    pub fn last_of(&self, kind: ResourceKind) -> Option<&str> {
        self.lists
            .get(&kind)
            .and_then(|names| names.last())
            .map(String::as_str)
    }

    /// Compact JSON block (`name -> {kind, ...details}`) for model prompts.
    /// A name shared by several kinds is keyed `kind/name` after its first use.
    pub fn to_prompt_block(&self) -> String {
        if self.entities.is_empty() {
            return String::new();
        }
        let mut block = Map::new();
        for entity in &self.entities {
            let mut details = entity.details.clone();
            details.insert("kind".into(), Value::String(entity.kind.to_string()));
            let key = if block.contains_key(&entity.name) {
                format!("{}/{}", entity.kind, entity.name)
            } else {
                entity.name.clone()
            };
            block.insert(key, Value::Object(details));
        }
        Value::Object(block).to_string()
    }
}

/// In-process, per-session store of recently observed resources.
///
/// A session with nothing unexpired left and no write for a full TTL is
/// dropped, either when it is next read or when a new session is created.
pub struct EpisodicMemory {
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionMemory>>,
}

impl EpisodicMemory {
    /// Create a memory whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn chrono_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Session entry for a write at `now`. Creating a new one first sweeps idle sessions.
    fn touch<'a>(
        &self,
        sessions: &'a mut HashMap<String, SessionMemory>,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> &'a mut SessionMemory {
        if !sessions.contains_key(session_id) {
            let ttl = self.chrono_ttl();
            let before = sessions.len();
            sessions.retain(|_, s| {
                s.prune(now, ttl);
                !s.is_idle(now, ttl)
            });
            let dropped = before - sessions.len();
            if dropped > 0 {
                debug!("Dropped {} idle memory sessions", dropped);
            }
        }
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionMemory::new(now));
        session.touched_at = now;
        session
    }

    /// Insert or refresh entities for a session.
    pub fn update(&self, session_id: &str, entities: Vec<ResourceEntity>) {
        if entities.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write();
        let session = self.touch(&mut sessions, session_id, Utc::now());
        for entity in entities {
            session
                .entities
                .insert((entity.kind, entity.name.clone()), entity);
        }
        debug!(
            "Memory for session {} holds {} entities",
            session_id,
            session.entities.len()
        );
    }

    /// Remember the order of a listing so "the first node" can be resolved.
    pub fn remember_list(
        &self,
        session_id: &str,
        kind: ResourceKind,
        names: Vec<String>,
        observed_at: DateTime<Utc>,
    ) {
        let mut sessions = self.sessions.write();
        let session = self.touch(&mut sessions, session_id, observed_at);
        session.lists.insert(kind, RememberedList { names, observed_at });
    }

    /// Snapshot at the current time.
    pub fn read(&self, session_id: &str) -> MemorySnapshot {
        self.read_at(session_id, Utc::now())
    }

    /// Snapshot as seen at `now`. Expired entries are dropped before returning.
    pub fn read_at(&self, session_id: &str, now: DateTime<Utc>) -> MemorySnapshot {
        let ttl = self.chrono_ttl();
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(session_id) else {
            return MemorySnapshot::default();
        };

        let pruned = session.prune(now, ttl);
        if pruned > 0 {
            debug!("Pruned {} expired entities for session {}", pruned, session_id);
        }
        if session.is_idle(now, ttl) {
            sessions.remove(session_id);
            debug!("Dropped idle memory session {}", session_id);
            return MemorySnapshot::default();
        }

        let mut entities: Vec<ResourceEntity> = session.entities.values().cloned().collect();
        entities.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.kind.to_string().cmp(&b.kind.to_string()))
        });
        let lists = session
            .lists
            .iter()
            .map(|(kind, list)| (*kind, list.names.clone()))
            .collect();

        MemorySnapshot { entities, lists }
    }

    /// Record the backend group of the last executed capability.
    pub fn set_last_group(&self, session_id: &str, group: BackendGroup) {
        let mut sessions = self.sessions.write();
        self.touch(&mut sessions, session_id, Utc::now()).last_group = Some(group);
    }

    pub fn last_group(&self, session_id: &str) -> Option<BackendGroup> {
        self.sessions.read().get(session_id).and_then(|s| s.last_group)
    }

    /// Forget everything about a session.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(name: &str, kind: ResourceKind, at: DateTime<Utc>) -> ResourceEntity {
        let mut details = Map::new();
        details.insert("status".into(), json!("Running"));
        ResourceEntity {
            name: name.into(),
            kind,
            details,
            observed_at: at,
        }
    }

    #[test]
    fn test_read_within_ttl() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let t0 = Utc::now();
        memory.update("s1", vec![entity("web-1", ResourceKind::Pod, t0)]);

        let snap = memory.read_at("s1", t0 + chrono::Duration::seconds(299));
        assert_eq!(snap.entities.len(), 1);
        assert_eq!(snap.get("web-1").unwrap().kind, ResourceKind::Pod);
    }

    #[test]
    fn test_expired_entries_pruned_idempotently() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let t0 = Utc::now();
        memory.update("s1", vec![entity("web-1", ResourceKind::Pod, t0)]);

        let later = t0 + chrono::Duration::seconds(301);
        let first = memory.read_at("s1", later);
        let second = memory.read_at("s1", later);
        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_eq!(first.entities, second.entities);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let now = Utc::now();
        memory.update("a", vec![entity("kc-m1", ResourceKind::Node, now)]);
        assert!(memory.read_at("b", now).is_empty());
        assert!(!memory.read_at("a", now).is_empty());
    }

    #[test]
    fn test_refresh_replaces_entity() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let t0 = Utc::now();
        memory.update("s", vec![entity("web-1", ResourceKind::Pod, t0)]);
        let t1 = t0 + chrono::Duration::seconds(200);
        memory.update("s", vec![entity("web-1", ResourceKind::Pod, t1)]);

        // Refreshed at t1, so still alive at t0 + 400s.
        let snap = memory.read_at("s", t0 + chrono::Duration::seconds(400));
        assert_eq!(snap.entities.len(), 1);
    }

    #[test]
    fn test_ordinal_lists() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let now = Utc::now();
        memory.remember_list(
            "s",
            ResourceKind::Node,
            vec!["kc-m1".into(), "kc-w1".into(), "kc-w2".into()],
            now,
        );
        let snap = memory.read_at("s", now);
        assert_eq!(snap.ordinal(ResourceKind::Node, 0), Some("kc-m1"));
        assert_eq!(snap.last_of(ResourceKind::Node), Some("kc-w2"));
        assert_eq!(snap.ordinal(ResourceKind::Pod, 0), None);
    }

    #[test]
    fn test_prompt_block() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let now = Utc::now();
        memory.update("s", vec![entity("web-1", ResourceKind::Pod, now)]);
        let block = memory.read_at("s", now).to_prompt_block();
        let parsed: Value = serde_json::from_str(&block).unwrap();
        assert_eq!(parsed["web-1"]["kind"], "pod");
        assert_eq!(parsed["web-1"]["status"], "Running");
    }

    #[test]
    fn test_same_name_different_kinds() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let now = Utc::now();
        memory.update(
            "s",
            vec![
                entity("web", ResourceKind::Pod, now),
                entity("web", ResourceKind::Deployment, now),
            ],
        );
        let snap = memory.read_at("s", now);
        assert_eq!(snap.entities.len(), 2);
        assert!(snap.get_kind(ResourceKind::Pod, "web").is_some());
        assert!(snap.get_kind(ResourceKind::Deployment, "web").is_some());

        let parsed: Value = serde_json::from_str(&snap.to_prompt_block()).unwrap();
        assert_eq!(parsed.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_idle_session_dropped_on_read() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let t0 = Utc::now();
        memory.update("s1", vec![entity("web-1", ResourceKind::Pod, t0)]);
        assert_eq!(memory.session_count(), 1);

        assert!(memory.read_at("s1", t0 + chrono::Duration::seconds(600)).is_empty());
        assert_eq!(memory.session_count(), 0);
    }

    #[test]
    fn test_new_session_sweeps_idle_ones() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(600);
        memory.remember_list("stale", ResourceKind::Node, vec!["kc-m1".into()], old);
        memory.update("fresh", vec![entity("web-1", ResourceKind::Pod, now)]);
        assert_eq!(memory.session_count(), 1);
        assert!(!memory.read_at("fresh", now).is_empty());
    }

    #[test]
    fn test_last_group_and_clear() {
        let memory = EpisodicMemory::new(Duration::from_secs(300));
        assert_eq!(memory.last_group("s"), None);
        memory.set_last_group("s", BackendGroup::LocalCluster);
        assert_eq!(memory.last_group("s"), Some(BackendGroup::LocalCluster));
        assert!(memory.clear("s"));
        assert_eq!(memory.last_group("s"), None);
    }
}
