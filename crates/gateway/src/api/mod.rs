pub mod annotations;
pub mod auth;
pub mod events;
pub mod health;
pub mod scope;
pub mod sessions;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Serialize;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind [`auth::require_auth`], which also decides whose data a
/// request sees).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status));

    let protected = Router::new()
        // Sessions
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/sessions/:id",
            get(sessions::get_session).patch(sessions::update_session),
        )
        .route("/sessions/:id/pending", get(annotations::session_pending))
        .route("/sessions/:id/annotations", post(annotations::add_annotation))
        // Event streams
        .route("/sessions/:id/events", get(events::session_events))
        .route("/events", get(events::domain_events))
        // Annotations
        .route("/pending", get(annotations::all_pending))
        .route(
            "/annotations/:id",
            get(annotations::get_annotation)
                .patch(annotations::update_annotation)
                .delete(annotations::delete_annotation),
        )
        .route("/annotations/:id/status", patch(annotations::update_status))
        .route("/annotations/:id/thread", post(annotations::add_thread_message))
        .route_layer(middleware::from_fn_with_state(state, auth::require_auth));

    public.merge(protected)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Log a store failure and hide its detail from the client.
pub(crate) fn internal_error(err: pm_domain::Error) -> Response {
    tracing::error!(error = %err, "store operation failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

/// Any unreadable body is a 400, whether it failed to parse or to match
/// the expected shape.
pub(crate) fn bad_body(rejection: JsonRejection) -> Response {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}

/// `Ok(Some)` → `status` + JSON, `Ok(None)` → 404 naming `what`.
pub(crate) fn found<T: Serialize>(
    result: pm_domain::Result<Option<T>>,
    status: StatusCode,
    what: &str,
) -> Response {
    match result {
        Ok(Some(value)) => (status, Json(value)).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("{what} not found")),
        Err(e) => internal_error(e),
    }
}

pub(crate) fn listed<T: Serialize>(result: pm_domain::Result<T>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => internal_error(e),
    }
}
