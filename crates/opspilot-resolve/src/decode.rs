//! Decoding of model output into validated capability calls.
//!
//! `decode_calls` is the only place raw model text is inspected. It drops
//! `<thinking>` blocks and code fences, pulls the first parseable JSON value
//! out of surrounding prose, repairs near-JSON (single quotes, Python
//! literals, trailing commas, unclosed brackets), accepts several call
//! shapes, and checks every call against the registry.

use once_cell::sync::Lazy;
use opspilot_core::{CapabilityRegistry, ResolvedCall, ValidationError};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").unwrap());
static THINKING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<thinking>.*?(?:</thinking>|$)").unwrap());
static PROSE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:remote|local|docker)_\w+)\b").unwrap());

/// Keys under which wrapper objects nest their call list.
const LIST_KEYS: &[&str] = &["tool_calls", "calls", "actions"];
/// Keys accepted for a call's arguments, in preference order.
const ARGUMENT_KEYS: &[&str] = &["arguments", "parameters", "args", "params"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Empty response")]
    Empty,

    #[error("No JSON list found in response")]
    NoJson,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unexpected call shape: {0}")]
    Shape(String),

    #[error("Response contained no capability calls")]
    NoCalls,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Decode raw model text into registry-validated calls.
pub fn decode_calls(
    raw: &str,
    registry: &CapabilityRegistry,
) -> Result<Vec<ResolvedCall>, ParseError> {
    let calls = match parse_value(raw) {
        Ok(value) => calls_from_value(value)?,
        Err(ParseError::NoJson) => {
            let name = prose_mention(raw, registry).ok_or(ParseError::NoJson)?;
            vec![ResolvedCall::new(name, Map::new())]
        }
        Err(e) => return Err(e),
    };

    if calls.is_empty() {
        return Err(ParseError::NoCalls);
    }
    for call in &calls {
        registry.validate(&call.capability, &call.arguments)?;
    }
    Ok(calls)
}

/// First registered capability name mentioned in prose.
fn prose_mention(raw: &str, registry: &CapabilityRegistry) -> Option<String> {
    PROSE_NAME_RE
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|name| registry.contains(name))
        .map(str::to_string)
}

// ---------------------------------------------------------------
// Text -> JSON value
// ---------------------------------------------------------------

fn strip_fences(text: &str) -> &str {
    if let Some(inner) = FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    // Unterminated fence: drop the opening line.
    if let Some(rest) = text.strip_prefix("```") {
        return rest.split_once('\n').map(|(_, body)| body).unwrap_or("").trim();
    }
    text
}

fn parse_value(raw: &str) -> Result<Value, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let without_reasoning = THINKING_RE.replace_all(raw, "");
    let body = strip_fences(without_reasoning.trim());

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if value.is_array() || value.is_object() {
            return Ok(value);
        }
    }

    let mut first_error = None;
    for start in body
        .char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .map(|(i, _)| i)
    {
        let region = json_region(&body[start..]);
        let parsed = serde_json::from_str::<Value>(region)
            .or_else(|_| serde_json::from_str::<Value>(&repair(region)));
        match parsed {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    Err(first_error.map_or(ParseError::NoJson, ParseError::InvalidJson))
}

/// The balanced bracket region at the start of `text`, or all of it when
/// the brackets never close.
fn json_region(text: &str) -> &str {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[..=i];
                }
            }
            _ => {}
        }
    }
    text
}

fn trim_trailing_comma(out: &mut String) {
    let len = out.trim_end().len();
    if out[..len].ends_with(',') {
        out.truncate(len - 1);
    }
}

/// Rewrite near-JSON into JSON.
fn repair(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        if next == '\'' {
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(next);
                        }
                    }
                }
                '"' if q == '\'' => out.push_str("\\\""),
                _ if c == q => {
                    out.push('"');
                    quote = None;
                }
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push('"');
            }
            '[' | '{' => {
                stack.push(c);
                out.push(c);
            }
            ']' | '}' => {
                trim_trailing_comma(&mut out);
                stack.pop();
                out.push(c);
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            _ => out.push(c),
        }
    }

    if quote.is_some() {
        out.push('"');
    }
    while let Some(open) = stack.pop() {
        trim_trailing_comma(&mut out);
        out.push(if open == '[' { ']' } else { '}' });
    }
    out
}

// ---------------------------------------------------------------
// JSON value -> calls
// ---------------------------------------------------------------

fn names_a_call(value: &Value) -> bool {
    value.get("name").is_some() || value.get("function").is_some()
}

fn calls_from_value(value: Value) -> Result<Vec<ResolvedCall>, ParseError> {
    match value {
        Value::Array(items) => {
            let is_pair = items.len() == 2
                && items[0].is_string()
                && items[1].is_object()
                && !names_a_call(&items[1]);
            if is_pair {
                return Ok(vec![call_from_item(Value::Array(items))?]);
            }
            items.into_iter().map(call_from_item).collect()
        }
        Value::Object(mut map) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return items.into_iter().map(call_from_item).collect();
                }
            }
            Ok(vec![call_from_item(Value::Object(map))?])
        }
        other => Err(ParseError::Shape(format!("expected a list of calls, got {}", other))),
    }
}

fn call_from_item(item: Value) -> Result<ResolvedCall, ParseError> {
    match item {
        Value::String(name) => Ok(ResolvedCall::new(name.trim(), Map::new())),
        Value::Array(mut parts) if (1..=2).contains(&parts.len()) => {
            let args = if parts.len() == 2 { parts.pop() } else { None };
            let name = parts
                .pop()
                .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
                .ok_or_else(|| ParseError::Shape("pair without a capability name".into()))?;
            Ok(ResolvedCall::new(name, arguments_from(args)?))
        }
        Value::Object(mut map) => {
            if let Some(Value::Object(function)) = map.remove("function") {
                return call_from_item(Value::Object(function));
            }
            let name = ["name", "capability", "tool"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .ok_or_else(|| ParseError::Shape("call without a name".into()))?;
            let args = ARGUMENT_KEYS.iter().find_map(|k| map.remove(*k));
            Ok(ResolvedCall::new(name, arguments_from(args)?))
        }
        other => Err(ParseError::Shape(format!("unsupported call item {}", other))),
    }
}

fn arguments_from(value: Option<Value>) -> Result<Map<String, Value>, ParseError> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(s)) => match parse_value(&s)? {
            Value::Object(map) => Ok(map),
            _ => Err(ParseError::Shape("arguments must be an object".into())),
        },
        Some(_) => Err(ParseError::Shape("arguments must be an object".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::builtin().unwrap()
    }

    fn decode(raw: &str) -> Result<Vec<ResolvedCall>, ParseError> {
        decode_calls(raw, &registry())
    }

    fn names(calls: &[ResolvedCall]) -> Vec<&str> {
        calls.iter().map(|c| c.capability.as_str()).collect()
    }

    #[test]
    fn test_plain_list() {
        let calls = decode(
            r#"[{"name": "remote_list_pods", "arguments": {"namespace": "default"}},
                {"name": "docker_list_containers", "arguments": {}}]"#,
        )
        .unwrap();
        assert_eq!(names(&calls), vec!["remote_list_pods", "docker_list_containers"]);
        assert_eq!(calls[0].arguments["namespace"], "default");
    }

    #[test]
    fn test_code_fence_and_prose() {
        let fenced = "```json\n[{\"name\": \"local_list_nodes\", \"arguments\": {}}]\n```";
        assert_eq!(names(&decode(fenced).unwrap()), vec!["local_list_nodes"]);

        let prose = "Sure, here's the plan: [{\"name\": \"remote_list_nodes\"}] Hope that helps!";
        assert_eq!(names(&decode(prose).unwrap()), vec!["remote_list_nodes"]);
    }

    #[test]
    fn test_repairs_python_style_output() {
        let raw = "[{'name': 'local_list_pods', 'arguments': {'namespace': 'default', 'watch': True,},},]";
        let calls = decode(raw).unwrap();
        assert_eq!(calls[0].capability, "local_list_pods");
        assert_eq!(calls[0].arguments["watch"], true);
    }

    #[test]
    fn test_repairs_unclosed_brackets() {
        let raw = r#"[{"name": "remote_describe_node", "arguments": {"node_name": "kc-m1""#;
        let calls = decode(raw).unwrap();
        assert_eq!(calls[0].arguments, json!({"node_name": "kc-m1"}).as_object().cloned().unwrap());
    }

    #[test]
    fn test_alternate_shapes() {
        let single = decode(r#"{"name": "remote_list_nodes", "parameters": {"limit": 5}}"#).unwrap();
        assert_eq!(single[0].arguments["limit"], 5);

        let pair = decode(r#"["remote_describe_pod", {"pod_name": "web-1"}]"#).unwrap();
        assert_eq!(names(&pair), vec!["remote_describe_pod"]);

        let pairs = decode(r#"[["local_list_pods", {}], "docker_list_containers"]"#).unwrap();
        assert_eq!(names(&pairs), vec!["local_list_pods", "docker_list_containers"]);

        let wrapped = decode(
            r#"{"tool_calls": [{"function": {"name": "docker_container_logs", "arguments": "{\"container_name_or_id\": \"web\"}"}}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped[0].arguments["container_name_or_id"], "web");
    }

    #[test]
    fn test_validation_errors() {
        let err = decode(r#"[{"name": "remote_list_everything"}]"#).unwrap_err();
        assert_eq!(err.to_string(), "Capability 'remote_list_everything' does not exist.");

        let err = decode(r#"[{"name": "remote_describe_pod", "arguments": {}}]"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::Validation(ValidationError::MissingArgument {
                capability: "remote_describe_pod".into(),
                argument: "pod_name".into(),
            })
        );
    }

    #[test]
    fn test_prose_fallback() {
        let calls = decode("You should call remote_list_nodes for that.").unwrap();
        assert_eq!(names(&calls), vec!["remote_list_nodes"]);

        let err = decode("Use remote_describe_node to look at it.").unwrap_err();
        assert!(matches!(err, ParseError::Validation(_)));

        assert_eq!(decode("I am not sure what you mean.").unwrap_err(), ParseError::NoJson);
    }

    #[test]
    fn test_reasoning_block_is_ignored() {
        let raw = "<thinking>Maybe [remote] or [local]? The user said remote.</thinking>\n\
                   [{\"name\": \"remote_list_pods\", \"arguments\": {\"namespace\": \"default\"}}]";
        assert_eq!(names(&decode(raw).unwrap()), vec!["remote_list_pods"]);
    }

    #[test]
    fn test_empty_and_invalid() {
        assert_eq!(decode("  ").unwrap_err(), ParseError::Empty);
        assert_eq!(decode("[]").unwrap_err(), ParseError::NoCalls);
        assert!(matches!(decode(r#"[{"name": }"#).unwrap_err(), ParseError::InvalidJson(_)));
        assert!(matches!(decode("42").unwrap_err(), ParseError::NoJson));
    }
}
