//! JSON-RPC 2.0 client for the three backend endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opspilot_core::{Capability, EndpointConfig, ExecutionResult};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::backend::{Backend, UNREACHABLE_PREFIX};

/// Longest slice of an HTTP error body kept in the failure message.
const ERROR_BODY_LIMIT: usize = 200;

pub struct JsonRpcBackend {
    client: Client,
    endpoints: EndpointConfig,
    next_id: AtomicU64,
}

impl JsonRpcBackend {
    pub fn new(endpoints: EndpointConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            endpoints,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }
}

/// Map a JSON-RPC response envelope to an execution result.
pub fn interpret_envelope(envelope: Value) -> ExecutionResult {
    let Value::Object(mut obj) = envelope else {
        return ExecutionResult::failure("Invalid response from backend: not an object");
    };
    if let Some(error) = obj.remove("error").filter(|e| !e.is_null()) {
        let message = match &error {
            Value::String(s) => s.clone(),
            Value::Object(o) => o
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
            other => other.to_string(),
        };
        return ExecutionResult::failure(message);
    }
    match obj.remove("result") {
        Some(result) => ExecutionResult::from_response(result),
        None => ExecutionResult::failure("No result returned"),
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[async_trait]
impl Backend for JsonRpcBackend {
    async fn call(&self, capability: &Capability, arguments: &Map<String, Value>) -> ExecutionResult {
        let url = self.endpoints.url_for(capability.backend_group);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": capability.name,
            "params": arguments,
            "id": id,
        });
        debug!("JSON-RPC {} -> {} (id {})", capability.name, url, id);

        let response = match self.client.post(url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return ExecutionResult::failure("Request timed out"),
            Err(e) if e.is_connect() => {
                return ExecutionResult::failure(format!(
                    "{} at {}. Is it running?",
                    UNREACHABLE_PREFIX, url
                ))
            }
            Err(e) => return ExecutionResult::failure(format!("Request failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} returned HTTP {}", capability.name, status);
            return ExecutionResult::failure(format!(
                "Backend returned HTTP {}: {}",
                status,
                truncate(body.trim(), ERROR_BODY_LIMIT)
            ));
        }

        match response.json::<Value>().await {
            Ok(envelope) => interpret_envelope(envelope),
            Err(e) if e.is_timeout() => ExecutionResult::failure("Request timed out"),
            Err(e) => ExecutionResult::failure(format!("Invalid response from backend: {}", e)),
        }
    }
}
