//! LLM provider streaming implementations.
//!
//! Each provider streams tokens via SSE. OpenAI, Groq and Ollama (through its
//! OpenAI-compatible endpoint) share one format; Anthropic uses its own.

use std::pin::Pin;

use futures::Stream;
use reqwest::Client;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::config::ResolvedProvider;
use crate::types::{ChatMessage, LLMProvider};

/// Boxed stream type for returning different stream implementations.
pub type BoxedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A single streamed token or error.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done { tokens_used: usize },
    Error(String),
}

/// Sampling parameters for one request.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub temperature: f64,
    pub max_tokens: usize,
}

/// Stream tokens from the resolved provider.
pub fn stream_llm(
    client: &Client,
    resolved: &ResolvedProvider,
    messages: Vec<ChatMessage>,
    model: &str,
    sampling: Sampling,
) -> BoxedStream {
    match resolved.provider {
        LLMProvider::OpenAI => Box::pin(stream_openai_compat(
            client.clone(),
            "https://api.openai.com/v1/chat/completions".to_string(),
            messages,
            model.to_string(),
            resolved.api_key.clone(),
            sampling,
        )),
        LLMProvider::Groq => Box::pin(stream_openai_compat(
            client.clone(),
            "https://api.groq.com/openai/v1/chat/completions".to_string(),
            messages,
            model.to_string(),
            resolved.api_key.clone(),
            sampling,
        )),
        LLMProvider::Ollama => {
            let base = resolved
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Box::pin(stream_openai_compat(
                client.clone(),
                format!("{}/v1/chat/completions", base),
                messages,
                model.to_string(),
                None,
                sampling,
            ))
        }
        LLMProvider::Anthropic => Box::pin(stream_anthropic(
            client.clone(),
            messages,
            model.to_string(),
            resolved.api_key.clone().unwrap_or_default(),
            sampling,
        )),
    }
}

/// Drain a stream into the full completion text.
pub async fn collect_stream(mut stream: BoxedStream) -> Result<String, String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            StreamChunk::Token(t) => text.push_str(&t),
            StreamChunk::Done { tokens_used } => {
                debug!("Completion finished after {} chunks", tokens_used);
                break;
            }
            StreamChunk::Error(e) => return Err(e),
        }
    }
    Ok(text)
}

/// Split an SSE buffer into complete `data:` payloads, keeping the remainder.
fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(line_end) = buffer.find('\n') {
        let line = buffer[..line_end].trim().to_string();
        buffer.drain(..=line_end);

        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            out.push(data.trim().to_string());
        }
    }
    out
}

/// Stream from OpenAI-compatible APIs (OpenAI, Groq, Ollama).
fn stream_openai_compat(
    client: Client,
    url: String,
    messages: Vec<ChatMessage>,
    model: String,
    api_key: Option<String>,
    sampling: Sampling,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    let msgs: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    async_stream::stream! {
        let body = json!({
            "model": model,
            "messages": msgs,
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
            "stream": true,
        });

        debug!("Streaming from {} with model {}", url, model);

        let mut request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&bytes));

            for data in drain_sse_data(&mut buffer) {
                if data == "[DONE]" {
                    yield StreamChunk::Done { tokens_used: token_count };
                    return;
                }
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) {
                    if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str() {
                        if !content.is_empty() {
                            token_count += 1;
                            yield StreamChunk::Token(content.to_string());
                        }
                    }
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}

/// Stream from Anthropic's Messages API.
fn stream_anthropic(
    client: Client,
    messages: Vec<ChatMessage>,
    model: String,
    api_key: String,
    sampling: Sampling,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    // Separate system message from conversation
    let system_msg: Option<String> = messages
        .iter()
        .find(|m| m.role == "system")
        .map(|m| m.content.clone());

    let conv_msgs: Vec<serde_json::Value> = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    async_stream::stream! {
        let mut body = json!({
            "model": model,
            "messages": conv_msgs,
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
            "stream": true,
        });

        if let Some(sys) = system_msg {
            body["system"] = json!(sys);
        }

        debug!("Streaming from Anthropic with model {}", model);

        let response = match client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // Anthropic interleaves "event:" lines; only "data:" carries payload
            for data in drain_sse_data(&mut buffer) {
                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) else {
                    continue;
                };
                match parsed["type"].as_str() {
                    Some("content_block_delta") => {
                        if let Some(text) = parsed["delta"]["text"].as_str() {
                            if !text.is_empty() {
                                token_count += 1;
                                yield StreamChunk::Token(text.to_string());
                            }
                        }
                    }
                    Some("message_stop") => {
                        yield StreamChunk::Done { tokens_used: token_count };
                        return;
                    }
                    Some("error") => {
                        let msg = parsed["error"]["message"]
                            .as_str()
                            .unwrap_or("Unknown error");
                        error!("Anthropic error: {}", msg);
                        yield StreamChunk::Error(msg.to_string());
                        return;
                    }
                    _ => {}
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}
