//! Turn routes: run a query, replay an approved or chosen call, forget a session.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, post};
use axum::{Json, Router};
use opspilot_core::{ResolvedCall, TurnOutput};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/turn", post(turn))
        .route("/turn/confirm", post(confirm))
        .route("/sessions/{id}/memory", delete(clear_session))
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub call: ResolvedCall,
}

/// Turn output tagged with the session it ran in.
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(flatten)]
    pub turn: TurnOutput,
}

// ---------------------------------------------------------------
// Turns
// ---------------------------------------------------------------

async fn turn(State(state): State<Arc<AppState>>, Json(req): Json<TurnRequest>) -> impl IntoResponse {
    let query = req.query.trim();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Query is required" })),
        )
            .into_response();
    }

    let session_id = req
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("Turn in session {}: {}", session_id, query);

    let turn = state.orchestrator.handle_turn(&session_id, query).await;
    Json(TurnResponse { session_id, turn }).into_response()
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmRequest>,
) -> impl IntoResponse {
    if state.orchestrator.registry().get(&req.call.capability).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("Unknown capability: {}", req.call.capability),
            })),
        )
            .into_response();
    }

    info!("Confirmed {} in session {}", req.call.capability, req.session_id);
    let turn = state.orchestrator.confirm(&req.session_id, req.call).await;
    Json(TurnResponse {
        session_id: req.session_id,
        turn,
    })
    .into_response()
}

// ---------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------

async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let cleared = state.orchestrator.clear_session(&id);
    Json(serde_json::json!({ "sessionId": id, "cleared": cleared }))
}
