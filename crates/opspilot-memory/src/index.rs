//! Coarse infrastructure index: which backend knows which resource names.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opspilot_core::{BackendGroup, ResourceKind};
use parking_lot::RwLock;
use serde::Serialize;

/// Names shown per kind in the prompt summary.
const SUMMARY_NAME_LIMIT: usize = 20;

/// Where a resource name was last seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub group: BackendGroup,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
}

/// Reachability of a backend group as of its last poll.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub connected: bool,
    #[serde(rename = "checkedAt")]
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Object counts from the last successful poll.
    pub counts: BTreeMap<String, usize>,
}

#[derive(Default)]
struct IndexInner {
    entries: HashMap<(ResourceKind, String), Vec<IndexEntry>>,
    status: HashMap<BackendGroup, GroupStatus>,
}

/// Cross-session index refreshed by the background pulse.
pub struct InfrastructureIndex {
    ttl: Duration,
    inner: RwLock<IndexInner>,
}

impl InfrastructureIndex {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(IndexInner::default()),
        }
    }

    /// Record that `group` currently reports these `(name, namespace)` pairs.
    pub fn record(
        &self,
        kind: ResourceKind,
        group: BackendGroup,
        names: &[(String, Option<String>)],
        now: DateTime<Utc>,
    ) {
        let mut inner = self.inner.write();
        for (name, namespace) in names {
            let locations = inner.entries.entry((kind, name.clone())).or_default();
            match locations
                .iter_mut()
                .find(|e| e.group == group && &e.namespace == namespace)
            {
                Some(entry) => entry.last_seen = now,
                None => locations.push(IndexEntry {
                    group,
                    namespace: namespace.clone(),
                    last_seen: now,
                }),
            }
        }
    }

    /// Drop locations not refreshed within the TTL. Returns how many were removed.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let mut inner = self.inner.write();
        let mut removed = 0;
        inner.entries.retain(|_, locations| {
            let before = locations.len();
            locations.retain(|e| now - e.last_seen <= ttl);
            removed += before - locations.len();
            !locations.is_empty()
        });
        removed
    }

    /// Every known location of a named resource.
    pub fn locate(&self, kind: ResourceKind, name: &str) -> Vec<IndexEntry> {
        self.inner
            .read()
            .entries
            .get(&(kind, name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_status(&self, group: BackendGroup, status: GroupStatus) {
        self.inner.write().status.insert(group, status);
    }

    pub fn status(&self, group: BackendGroup) -> Option<GroupStatus> {
        self.inner.read().status.get(&group).cloned()
    }

    /// Whether the last poll of `group` failed. Unknown counts as reachable.
    pub fn is_down(&self, group: BackendGroup) -> bool {
        self.status(group).map(|s| !s.connected).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short text block describing backend health and known names.
    pub fn summary_block(&self) -> String {
        let inner = self.inner.read();
        if inner.status.is_empty() && inner.entries.is_empty() {
            return String::new();
        }

        let mut lines = vec!["[infrastructure]".to_string()];
        for group in BackendGroup::all() {
            if let Some(status) = inner.status.get(group) {
                let state = if status.connected { "up" } else { "down" };
                let counts: Vec<String> = status
                    .counts
                    .iter()
                    .map(|(k, v)| format!("{} {}", v, k))
                    .collect();
                if counts.is_empty() {
                    lines.push(format!("{}: {}", group, state));
                } else {
                    lines.push(format!("{}: {} ({})", group, state, counts.join(", ")));
                }
            }
        }

        let mut by_kind: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for ((kind, name), locations) in &inner.entries {
            let groups: Vec<String> = locations.iter().map(|l| l.group.to_string()).collect();
            by_kind
                .entry(kind.plural())
                .or_default()
                .push(format!("{} [{}]", name, groups.join("|")));
        }
        for (kind, mut names) in by_kind {
            names.sort();
            let more = names.len().saturating_sub(SUMMARY_NAME_LIMIT);
            names.truncate(SUMMARY_NAME_LIMIT);
            let suffix = if more > 0 { format!(" (+{} more)", more) } else { String::new() };
            lines.push(format!("known {}: {}{}", kind, names.join(", "), suffix));
        }

        lines.join("\n")
    }
}
