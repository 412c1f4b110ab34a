//! Storage backends.
//!
//! Both backends hold complete entities; all lifecycle rules live in
//! [`Store`](crate::Store). Absence is `Ok(None)` / `Ok(false)`, never an
//! error.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use pm_domain::config::{BackendChoice, StoreConfig};
use pm_domain::model::{Annotation, ApiKey, Event, Organization, Session, User};
use pm_domain::trace::TraceEvent;
use pm_domain::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Persistence contract shared by the volatile and durable backends.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    // ── sessions ────────────────────────────────────────────────────
    fn insert_session(&self, session: &Session) -> Result<()>;
    fn session(&self, id: &str) -> Result<Option<Session>>;
    fn update_session(&self, session: &Session) -> Result<()>;
    /// Newest first. `Some(user)` restricts to sessions owned by `user`.
    fn sessions(&self, owner: Option<&str>) -> Result<Vec<Session>>;

    // ── annotations ─────────────────────────────────────────────────
    fn insert_annotation(&self, annotation: &Annotation) -> Result<()>;
    fn annotation(&self, id: &str) -> Result<Option<Annotation>>;
    fn update_annotation(&self, annotation: &Annotation) -> Result<()>;
    fn delete_annotation(&self, id: &str) -> Result<bool>;
    /// Ordered by capture timestamp.
    fn session_annotations(&self, session_id: &str, pending_only: bool) -> Result<Vec<Annotation>>;
    /// Pending annotations across sessions, ordered by capture timestamp.
    /// `Some(user)` restricts to sessions owned by `user`.
    fn pending_annotations(&self, owner: Option<&str>) -> Result<Vec<Annotation>>;

    // ── events ──────────────────────────────────────────────────────
    fn append_event(&self, event: &Event, user_id: Option<&str>) -> Result<()>;
    /// Events for `session_id` with sequence strictly greater than `after`,
    /// ascending.
    fn events_since(&self, session_id: &str, after: u64) -> Result<Vec<Event>>;
    /// Events across all sessions with sequence strictly greater than
    /// `after`, ascending. `Some(user)` selects that user's events, `None`
    /// the events recorded without an owner.
    fn events_after(&self, after: u64, owner: Option<&str>) -> Result<Vec<Event>>;
    /// Highest persisted sequence, 0 when empty.
    fn max_sequence(&self) -> Result<u64>;
    /// Drop events stamped before `cutoff`. Returns the number removed.
    fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // ── tenants ─────────────────────────────────────────────────────
    fn insert_organization(&self, org: &Organization) -> Result<()>;
    fn organization(&self, id: &str) -> Result<Option<Organization>>;
    /// Fails with [`Error::Conflict`](pm_domain::Error::Conflict) when the
    /// email is taken.
    fn insert_user(&self, user: &User) -> Result<()>;
    fn user(&self, id: &str) -> Result<Option<User>>;
    fn user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn users_by_org(&self, org_id: &str) -> Result<Vec<User>>;
    fn insert_api_key(&self, key: &ApiKey) -> Result<()>;
    fn api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>>;
    /// Newest first.
    fn api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>>;
    fn delete_api_key(&self, id: &str) -> Result<bool>;
    fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Remove everything.
    fn reset(&self) -> Result<()>;
}

/// Pick and open the backend described by `config`.
///
/// Never fails: when the durable backend is unavailable (feature disabled
/// or the database cannot be opened) the volatile backend is returned and
/// the reason is logged.
pub fn open_backend(config: &StoreConfig) -> Arc<dyn Backend> {
    if config.backend == BackendChoice::Memory {
        TraceEvent::BackendSelected {
            backend: "memory".into(),
            path: None,
            reason: "configured".into(),
        }
        .emit();
        tracing::info!("using in-memory store");
        return Arc::new(MemoryBackend::new());
    }
    open_durable(config)
}

#[cfg(feature = "sqlite")]
fn open_durable(config: &StoreConfig) -> Arc<dyn Backend> {
    let path = config.db_path();
    match SqliteBackend::open(&path) {
        Ok(backend) => {
            TraceEvent::BackendSelected {
                backend: "sqlite".into(),
                path: Some(path.display().to_string()),
                reason: "opened".into(),
            }
            .emit();
            tracing::info!(path = %path.display(), "using sqlite store");
            Arc::new(backend)
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "sqlite unavailable, falling back to in-memory store"
            );
            TraceEvent::BackendSelected {
                backend: "memory".into(),
                path: None,
                reason: format!("sqlite failed: {e}"),
            }
            .emit();
            Arc::new(MemoryBackend::new())
        }
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_durable(_config: &StoreConfig) -> Arc<dyn Backend> {
    tracing::warn!("built without sqlite support, falling back to in-memory store");
    TraceEvent::BackendSelected {
        backend: "memory".into(),
        path: None,
        reason: "sqlite feature disabled".into(),
    }
    .emit();
    Arc::new(MemoryBackend::new())
}
