use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Delivery status: how many stream listeners are attached and whether
/// any of them is an agent.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "mode": state.config.server.mode,
        "backend": state.store.backend_kind().as_str(),
        "sequence": state.store.bus().sequence(),
        "activeListeners": state.listeners.active(),
        "agentListeners": state.listeners.agents(),
        "startedAt": state.started_at,
    }))
}
