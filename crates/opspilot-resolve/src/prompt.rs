//! Prompt assembly for model resolution.

use opspilot_chat::{ChatMessage, ReasoningMode};
use opspilot_core::{Capability, Role, SessionMessage};
use serde_json::Value;

/// Prior messages forwarded to the model.
pub const HISTORY_WINDOW: usize = 6;

/// Context blocks injected below the capability list.
#[derive(Debug, Default, Clone)]
pub struct PromptContext<'a> {
    /// Output of `MemorySnapshot::to_prompt_block`.
    pub memory: Option<&'a str>,
    /// Live names fetched for this turn.
    pub live: Option<&'a str>,
    /// Infrastructure index summary.
    pub infrastructure: Option<&'a str>,
}

/// System instructions listing the shortlisted capabilities.
pub fn system_prompt(
    mode: ReasoningMode,
    capabilities: &[&Capability],
    context: &PromptContext<'_>,
) -> String {
    let tools = Value::Array(capabilities.iter().map(|c| c.prompt_entry()).collect());

    let mut prompt = String::from(
        "You map infrastructure operations requests to capability calls.\n\
         Capabilities prefixed docker_ act on the local container engine, local_ on the \
         local cluster, remote_ on the remote cluster.\n\n",
    );
    prompt.push_str("Available capabilities:\n");
    prompt.push_str(&tools.to_string());
    prompt.push_str("\n\n");

    if let Some(memory) = context.memory.filter(|m| !m.is_empty()) {
        prompt.push_str("Recently observed resources:\n");
        prompt.push_str(memory);
        prompt.push_str("\n\n");
    }
    if let Some(infra) = context.infrastructure.filter(|s| !s.is_empty()) {
        prompt.push_str(infra);
        prompt.push_str("\n\n");
    }
    if let Some(live) = context.live.filter(|s| !s.is_empty()) {
        prompt.push_str("Live context:\n");
        prompt.push_str(live);
        prompt.push_str("\n\n");
    }

    match mode {
        ReasoningMode::Fast => prompt.push_str(
            "Respond with ONLY a JSON list of calls, each {\"name\": ..., \"arguments\": {...}}. \
             Use only the capabilities above and include every required argument. \
             Respond with [] if no capability applies.",
        ),
        ReasoningMode::Careful => prompt.push_str(
            "First reason step by step inside <thinking></thinking> tags: which capability \
             fits, which backend the user means, and where each required argument comes from. \
             After the closing tag, output ONLY a JSON list of calls, each \
             {\"name\": ..., \"arguments\": {...}}, using only the capabilities above.",
        ),
    }
    prompt
}

/// The user message, with the correction note of a failed attempt.
pub fn user_prompt(query: &str, feedback: Option<&str>) -> String {
    match feedback {
        Some(note) => format!("{}\n\n{}", query, note),
        None => query.to_string(),
    }
}

/// The last `HISTORY_WINDOW` user and assistant messages.
pub fn history_messages(history: &[SessionMessage]) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    history[start..]
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(ChatMessage::new("user", m.content.clone())),
            Role::Assistant => Some(ChatMessage::new("assistant", m.content.clone())),
            Role::System => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opspilot_core::CapabilityRegistry;

    #[test]
    fn test_system_prompt_lists_capabilities_and_context() {
        let registry = CapabilityRegistry::builtin().unwrap();
        let caps = vec![registry.get("remote_list_pods").unwrap()];
        let context = PromptContext {
            memory: Some(r#"{"web-1":{"kind":"pod"}}"#),
            live: None,
            infrastructure: Some("[infrastructure]\nremote_cluster: down"),
        };
        let prompt = system_prompt(ReasoningMode::Fast, &caps, &context);
        assert!(prompt.contains("\"remote_list_pods\""));
        assert!(!prompt.contains("local_list_pods"));
        assert!(prompt.contains("web-1"));
        assert!(prompt.contains("remote_cluster: down"));
        assert!(!prompt.contains("Live context"));

        let careful = system_prompt(ReasoningMode::Careful, &caps, &PromptContext::default());
        assert!(careful.contains("<thinking>"));
    }

    #[test]
    fn test_user_prompt_feedback() {
        assert_eq!(user_prompt("list pods", None), "list pods");
        assert_eq!(user_prompt("list pods", Some("[SYSTEM: x]")), "list pods\n\n[SYSTEM: x]");
    }

    #[test]
    fn test_history_window() {
        let history: Vec<SessionMessage> = (0..10)
            .map(|i| SessionMessage::user(format!("q{}", i)))
            .collect();
        let messages = history_messages(&history);
        assert_eq!(messages.len(), HISTORY_WINDOW);
        assert_eq!(messages[0].content, "q4");
    }
}
