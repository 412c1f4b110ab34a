//! API authentication middleware.
//!
//! Single-user mode reads the env var named by `config.server.api_token_env`
//! (default `PINMARK_API_TOKEN`) **once at startup** and caches the SHA-256
//! digest in `AppState`.
//! - If the env var is set and non-empty, every protected request must carry
//!   `Authorization: Bearer <token>`.
//! - If the env var is unset or empty, the server logs a warning once and
//!   allows unauthenticated access (dev mode).
//!
//! Multi-tenant mode requires `Authorization: Bearer sk_live_…` and resolves
//! the key to its owner through the tenant store.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use pm_domain::config::ServerMode;
use pm_domain::model::UserContext;
use pm_domain::trace::TraceEvent;

use super::{api_error, internal_error};
use crate::state::AppState;

/// Who a protected request acts for. Inserted as a request extension by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub enum Caller {
    /// Single-user deployment: the shared store, unscoped.
    Shared,
    /// Authenticated API key owner.
    User(UserContext),
}

/// Axum middleware guarding protected routes. Attach via
/// `axum::middleware::from_fn_with_state`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let provided = bearer_token(&req);

    let caller = match state.config.server.mode {
        ServerMode::SingleUser => {
            // `api_token_hash` is `None` in dev mode (no token configured).
            if let Some(expected) = &state.api_token_hash {
                if !token_matches(provided.as_deref().unwrap_or(""), expected) {
                    return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
                }
            }
            Caller::Shared
        }
        ServerMode::MultiTenant => {
            let Some(raw) = provided else {
                TraceEvent::ApiKeyRejected {
                    reason: "missing".into(),
                }
                .emit();
                return api_error(StatusCode::UNAUTHORIZED, "missing API key");
            };
            match state.tenants.authenticate(&raw) {
                Ok(Some(user)) => Caller::User(user),
                Ok(None) => {
                    return api_error(StatusCode::UNAUTHORIZED, "invalid or expired API key")
                }
                Err(e) => return internal_error(e),
            }
        }
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Hash the provided token to a fixed-length digest, then compare in
/// constant time so the token length does not leak.
fn token_matches(provided: &str, expected_hash: &[u8]) -> bool {
    let provided_hash = Sha256::digest(provided.as_bytes());
    bool::from(provided_hash.ct_eq(expected_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        let expected = Sha256::digest(b"s3cret").to_vec();
        assert!(token_matches("s3cret", &expected));
        assert!(!token_matches("s3cre", &expected));
        assert!(!token_matches("", &expected));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let req = Request::builder()
            .header("authorization", "Token abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);

        let req = Request::builder()
            .header("authorization", "Bearer abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc"));
    }
}
