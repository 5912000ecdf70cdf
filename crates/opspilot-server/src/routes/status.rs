//! Runtime status, capability catalog and safety policy routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use opspilot_core::{Access, BackendGroup};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(get_status))
        .route("/capabilities", get(list_capabilities))
        .route("/safety", get(get_safety))
        .route("/safety/dangerous", post(set_dangerous))
}

/// One catalog entry as listed by the API.
#[derive(Debug, Serialize)]
pub struct CapabilitySummary {
    pub name: String,
    pub description: String,
    #[serde(rename = "backendGroup")]
    pub backend_group: BackendGroup,
    pub access: Access,
    pub dangerous: bool,
    #[serde(rename = "argumentSchema")]
    pub argument_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct DangerousUpdate {
    pub name: String,
    pub dangerous: bool,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.orchestrator.status();
    Json(serde_json::json!({
        "status": status,
        "port": state.config.port,
        "disambiguation": state.config.disambiguation,
        "safetyConfirm": state.config.safety_confirm,
    }))
}

async fn list_capabilities(State(state): State<Arc<AppState>>) -> Json<Vec<CapabilitySummary>> {
    let policy = state.orchestrator.safety_policy();
    let capabilities = state
        .orchestrator
        .registry()
        .iter()
        .map(|c| CapabilitySummary {
            name: c.name.clone(),
            description: c.description.clone(),
            backend_group: c.backend_group,
            access: c.access,
            dangerous: policy.is_dangerous(c),
            argument_schema: c.argument_schema.clone(),
        })
        .collect();
    Json(capabilities)
}

// ---------------------------------------------------------------
// Safety policy
// ---------------------------------------------------------------

async fn get_safety(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let dangerous = state
        .orchestrator
        .safety_policy()
        .dangerous_capabilities(state.orchestrator.registry());
    Json(serde_json::json!({
        "enabled": state.config.safety_confirm,
        "dangerous": dangerous,
    }))
}

async fn set_dangerous(
    State(state): State<Arc<AppState>>,
    Json(update): Json<DangerousUpdate>,
) -> impl IntoResponse {
    if !state.orchestrator.registry().contains(&update.name) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Unknown capability: {}", update.name) })),
        );
    }

    let policy = state.orchestrator.safety_policy();
    if update.dangerous {
        policy.add_dangerous(&update.name);
    } else {
        policy.remove_dangerous(&update.name);
    }
    info!("Safety policy: {} dangerous={}", update.name, update.dangerous);

    (
        StatusCode::OK,
        Json(serde_json::json!({ "name": update.name, "dangerous": update.dangerous })),
    )
}
