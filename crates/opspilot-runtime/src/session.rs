//! Conversation history store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use opspilot_core::SessionMessage;
use parking_lot::RwLock;
use tracing::debug;

/// Append-only, ordered message log keyed by session id.
pub trait SessionStore: Send + Sync {
    fn append(&self, session_id: &str, message: SessionMessage);

    /// Messages in insertion order; empty for unknown sessions.
    fn history(&self, session_id: &str) -> Vec<SessionMessage>;

    /// Drop a session's log. Returns whether it existed.
    fn clear(&self, session_id: &str) -> bool;

    fn session_count(&self) -> usize;
}

/// Process-local session log. Only the most recent `max_messages` are kept
/// per session, and at most `max_sessions` sessions. Opening a session past
/// that bound evicts the one whose last message is oldest.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<SessionMessage>>>,
    max_messages: usize,
    max_sessions: usize,
}

impl InMemorySessionStore {
    pub fn new(max_messages: usize) -> Self {
        Self::with_capacity(max_messages, 1000)
    }

    pub fn with_capacity(max_messages: usize, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_messages: max_messages.max(1),
            max_sessions: max_sessions.max(1),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(200)
    }
}

fn last_activity(log: &[SessionMessage]) -> Option<DateTime<Utc>> {
    log.last().map(|m| m.timestamp)
}

impl SessionStore for InMemorySessionStore {
    fn append(&self, session_id: &str, message: SessionMessage) {
        let mut sessions = self.sessions.write();
        while !sessions.contains_key(session_id) && sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, log)| last_activity(log))
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            debug!("Evicted idle session {}", oldest);
        }
        let log = sessions.entry(session_id.to_string()).or_default();
        log.push(message);
        if log.len() > self.max_messages {
            let excess = log.len() - self.max_messages;
            log.drain(..excess);
        }
    }

    fn history(&self, session_id: &str) -> Vec<SessionMessage> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
