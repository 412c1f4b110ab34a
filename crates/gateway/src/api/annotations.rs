//! Annotation endpoints: capture, agent-side status changes, threads.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;

use pm_domain::model::{Actor, Annotation, AnnotationPatch, AnnotationStatus, NewAnnotation};

use super::auth::Caller;
use super::{api_error, bad_body, found, internal_error};
use crate::state::AppState;

fn pending_response(result: pm_domain::Result<Vec<Annotation>>) -> Response {
    match result {
        Ok(annotations) => Json(serde_json::json!({
            "count": annotations.len(),
            "annotations": annotations,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /pending, GET /sessions/:id/pending
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn all_pending(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Response {
    pending_response(state.scoped(&caller).all_pending())
}

pub async fn session_pending(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(session_id): Path<String>,
) -> Response {
    pending_response(state.scoped(&caller).session_pending(&session_id))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /sessions/:id/annotations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn add_annotation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(session_id): Path<String>,
    body: Result<Json<NewAnnotation>, JsonRejection>,
) -> Response {
    let Json(data) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_body(rejection),
    };
    if data.comment.is_empty() || data.element.is_empty() || data.element_path.is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            "comment, element, and elementPath are required",
        );
    }

    found(
        state.scoped(&caller).add_annotation(&session_id, data),
        StatusCode::CREATED,
        "session",
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET | PATCH | DELETE /annotations/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_annotation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Response {
    found(state.scoped(&caller).annotation(&id), StatusCode::OK, "annotation")
}

pub async fn update_annotation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Result<Json<AnnotationPatch>, JsonRejection>,
) -> Response {
    let Json(patch) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_body(rejection),
    };
    found(
        state.scoped(&caller).update_annotation(&id, patch),
        StatusCode::OK,
        "annotation",
    )
}

pub async fn delete_annotation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Response {
    match state.scoped(&caller).delete_annotation(&id) {
        Ok(Some(_)) => Json(serde_json::json!({ "deleted": true, "annotationId": id }))
            .into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "annotation not found"),
        Err(e) => internal_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATCH /annotations/:id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusBody {
    pub status: AnnotationStatus,
    /// Defaults to `agent` for terminal statuses.
    #[serde(default)]
    pub resolved_by: Option<Actor>,
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Result<Json<UpdateStatusBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_body(rejection),
    };
    found(
        state
            .scoped(&caller)
            .update_annotation_status(&id, body.status, body.resolved_by),
        StatusCode::OK,
        "annotation",
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /annotations/:id/thread
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ThreadMessageBody {
    pub role: Actor,
    #[serde(default)]
    pub content: String,
}

pub async fn add_thread_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Result<Json<ThreadMessageBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_body(rejection),
    };
    if body.content.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "role and content are required");
    }

    found(
        state
            .scoped(&caller)
            .add_thread_message(&id, body.role, &body.content),
        StatusCode::CREATED,
        "annotation",
    )
}
