//! Small lexical signals shared by the pattern table and disambiguation.

use once_cell::sync::Lazy;
use opspilot_core::BackendGroup;
use regex::Regex;

static REMOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bremote\b").unwrap());
static LOCAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blocal\b").unwrap());

/// Cluster named by the text. `remote` wins when both words appear.
pub fn explicit_cluster(text: &str) -> Option<BackendGroup> {
    if REMOTE_RE.is_match(text) {
        Some(BackendGroup::RemoteCluster)
    } else if LOCAL_RE.is_match(text) {
        Some(BackendGroup::LocalCluster)
    } else {
        None
    }
}

/// Both cluster words found in the text.
pub fn mentioned_clusters(text: &str) -> Vec<BackendGroup> {
    let mut groups = Vec::new();
    if REMOTE_RE.is_match(text) {
        groups.push(BackendGroup::RemoteCluster);
    }
    if LOCAL_RE.is_match(text) {
        groups.push(BackendGroup::LocalCluster);
    }
    groups
}

/// Map a phase word to the cluster API's capitalised phase.
/// `failing` reads as `Failed`; `paused` has no phase and yields None.
pub fn normalize_phase(word: &str) -> Option<String> {
    match word.trim().to_lowercase().as_str() {
        "running" => Some("Running".into()),
        "pending" => Some("Pending".into()),
        "failed" | "failing" => Some("Failed".into()),
        "succeeded" | "completed" => Some("Succeeded".into()),
        "unknown" => Some("Unknown".into()),
        _ => None,
    }
}
