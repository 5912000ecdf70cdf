//! API tests: drive the router in-process with scripted backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use opspilot_chat::{HttpLanguageModel, LLMConfig};
use opspilot_connectors::Backend;
use opspilot_core::{Capability, CapabilityRegistry, ExecutionResult, OpsPilotConfig};
use opspilot_runtime::Orchestrator;
use opspilot_server::{build_router, AppState};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

struct FakeBackend;

#[async_trait]
impl Backend for FakeBackend {
    async fn call(&self, capability: &Capability, _arguments: &Map<String, Value>) -> ExecutionResult {
        let response = match capability.operation.as_str() {
            "list_pods" => json!({"success": true, "pods": []}),
            _ => json!({"success": true, "message": format!("{} done", capability.name)}),
        };
        ExecutionResult::from_response(response)
    }
}

fn app() -> Router {
    let mut config = OpsPilotConfig::default();
    config.pulse.enabled = false;
    config.retry_backoff = Duration::ZERO;

    // No provider configured: anything past the pattern stage is unresolved.
    let llm = Arc::new(HttpLanguageModel::new(LLMConfig::default(), Duration::from_secs(1)));
    let orchestrator = Orchestrator::new(
        &config,
        CapabilityRegistry::builtin().unwrap(),
        Arc::new(FakeBackend),
        llm.clone(),
    );
    build_router(Arc::new(AppState::new(config, orchestrator, llm)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_turn_runs_pattern_query() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/turn",
        Some(json!({"sessionId": "s1", "query": "list remote pods"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], "s1");
    assert_eq!(body["output"], "No pods found in namespace 'default' (REMOTE).");
    assert_eq!(body["toolCalls"][0]["name"], "remote_list_pods");
    assert_eq!(body["toolCalls"][0]["arguments"], json!({"namespace": "default"}));
    assert!(body.get("confirmationRequest").is_none());
}

#[tokio::test]
async fn test_turn_assigns_session_id() {
    let app = app();
    let (status, body) = send(&app, "POST", "/api/turn", Some(json!({"query": "list remote pods"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["sessionId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let app = app();
    let (status, body) = send(&app, "POST", "/api/turn", Some(json!({"query": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_dangerous_turn_then_confirm() {
    let app = app();
    let (_, held) = send(
        &app,
        "POST",
        "/api/turn",
        Some(json!({"sessionId": "s1", "query": "stop container redis"})),
    )
    .await;

    let request = &held["confirmationRequest"];
    assert_eq!(request["isDangerous"], true);
    assert_eq!(request["capability"], "docker_stop_container");
    assert_eq!(held["output"], "Action requires approval: docker_stop_container");

    let call = json!({"name": request["capability"], "arguments": request["arguments"]});
    let (status, done) = send(
        &app,
        "POST",
        "/api/turn/confirm",
        Some(json!({"sessionId": "s1", "call": call})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["output"], "docker_stop_container done");
}

#[tokio::test]
async fn test_confirm_unknown_capability() {
    let app = app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/turn/confirm",
        Some(json!({"sessionId": "s1", "call": {"name": "format_disk", "arguments": {}}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unresolved_without_model() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/turn",
        Some(json!({"sessionId": "s1", "query": "why is everything slow today"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["output"],
        "I couldn't understand that request or map it to a valid tool. Please try again."
    );
    assert_eq!(body["toolCalls"], json!([]));
}

#[tokio::test]
async fn test_status_and_capabilities() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["status"]["capabilities"].as_u64().unwrap() > 0);
    assert_eq!(body["status"]["modelAvailable"], false);
    assert_eq!(body["status"]["backends"].as_array().unwrap().len(), 3);

    let (_, caps) = send(&app, "GET", "/api/capabilities", None).await;
    let stop = caps
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "docker_stop_container")
        .unwrap();
    assert_eq!(stop["dangerous"], true);
    assert_eq!(stop["access"], "mutate");
}

#[tokio::test]
async fn test_safety_policy_update() {
    let app = app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/safety/dangerous",
        Some(json!({"name": "docker_stop_container", "dangerous": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app,
        "POST",
        "/api/turn",
        Some(json!({"sessionId": "s1", "query": "stop container redis"})),
    )
    .await;
    assert!(body.get("confirmationRequest").is_none());
    assert_eq!(body["output"], "docker_stop_container done");
}

#[tokio::test]
async fn test_clear_session_memory() {
    let app = app();
    send(
        &app,
        "POST",
        "/api/turn",
        Some(json!({"sessionId": "s1", "query": "list remote pods"})),
    )
    .await;

    let (status, body) = send(&app, "DELETE", "/api/sessions/s1/memory", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);

    let (_, again) = send(&app, "DELETE", "/api/sessions/s1/memory", None).await;
    assert_eq!(again["cleared"], false);
}
