//! Owner-aware dispatch.
//!
//! Handlers never branch on the server mode themselves. They ask
//! [`AppState::scoped`] for a view bound to the authenticated [`Caller`]
//! and call the same operation either way: the shared store for
//! single-user deployments, the tenant store (and user-scoped bus) when
//! the request carried an API key.

use pm_domain::model::{
    Actor, Annotation, AnnotationPatch, AnnotationStatus, Event, NewAnnotation, Session,
    SessionStatus, SessionWithAnnotations,
};
use pm_domain::Result;
use pm_events::Subscription;

use super::auth::Caller;
use crate::state::AppState;

pub struct Scoped<'a> {
    state: &'a AppState,
    caller: &'a Caller,
}

impl AppState {
    pub fn scoped<'a>(&'a self, caller: &'a Caller) -> Scoped<'a> {
        Scoped {
            state: self,
            caller,
        }
    }
}

impl Scoped<'_> {
    // ── sessions ────────────────────────────────────────────────────

    pub fn create_session(&self, url: &str, project_id: Option<String>) -> Result<Session> {
        match self.caller {
            Caller::Shared => self.state.store.create_session(url, project_id),
            Caller::User(u) => self
                .state
                .tenants
                .create_session_for_user(&u.user_id, url, project_id),
        }
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        match self.caller {
            Caller::Shared => self.state.store.list_sessions(),
            Caller::User(u) => self.state.tenants.list_sessions_for_user(&u.user_id),
        }
    }

    pub fn session(&self, id: &str) -> Result<Option<Session>> {
        match self.caller {
            Caller::Shared => self.state.store.get_session(id),
            Caller::User(u) => self.state.tenants.get_session_for_user(&u.user_id, id),
        }
    }

    pub fn session_with_annotations(&self, id: &str) -> Result<Option<SessionWithAnnotations>> {
        match self.caller {
            Caller::Shared => self.state.store.get_session_with_annotations(id),
            Caller::User(u) => self
                .state
                .tenants
                .get_session_with_annotations_for_user(&u.user_id, id),
        }
    }

    pub fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<Option<Session>> {
        match self.caller {
            Caller::Shared => self.state.store.update_session_status(id, status),
            Caller::User(u) => self
                .state
                .tenants
                .update_session_status_for_user(&u.user_id, id, status),
        }
    }

    // ── annotations ─────────────────────────────────────────────────

    pub fn add_annotation(&self, session_id: &str, data: NewAnnotation) -> Result<Option<Annotation>> {
        match self.caller {
            Caller::Shared => self.state.store.add_annotation(session_id, data),
            Caller::User(u) => self
                .state
                .tenants
                .add_annotation_for_user(&u.user_id, session_id, data),
        }
    }

    pub fn annotation(&self, id: &str) -> Result<Option<Annotation>> {
        match self.caller {
            Caller::Shared => self.state.store.get_annotation(id),
            Caller::User(u) => self.state.tenants.get_annotation_for_user(&u.user_id, id),
        }
    }

    pub fn update_annotation(&self, id: &str, patch: AnnotationPatch) -> Result<Option<Annotation>> {
        match self.caller {
            Caller::Shared => self.state.store.update_annotation(id, patch),
            Caller::User(u) => self
                .state
                .tenants
                .update_annotation_for_user(&u.user_id, id, patch),
        }
    }

    pub fn update_annotation_status(
        &self,
        id: &str,
        status: AnnotationStatus,
        resolved_by: Option<Actor>,
    ) -> Result<Option<Annotation>> {
        match self.caller {
            Caller::Shared => self
                .state
                .store
                .update_annotation_status(id, status, resolved_by),
            Caller::User(u) => self.state.tenants.update_annotation_status_for_user(
                &u.user_id,
                id,
                status,
                resolved_by,
            ),
        }
    }

    pub fn add_thread_message(
        &self,
        id: &str,
        role: Actor,
        content: &str,
    ) -> Result<Option<Annotation>> {
        match self.caller {
            Caller::Shared => self.state.store.add_thread_message(id, role, content),
            Caller::User(u) => self
                .state
                .tenants
                .add_thread_message_for_user(&u.user_id, id, role, content),
        }
    }

    pub fn delete_annotation(&self, id: &str) -> Result<Option<Annotation>> {
        match self.caller {
            Caller::Shared => self.state.store.delete_annotation(id),
            Caller::User(u) => self.state.tenants.delete_annotation_for_user(&u.user_id, id),
        }
    }

    pub fn session_pending(&self, session_id: &str) -> Result<Vec<Annotation>> {
        match self.caller {
            Caller::Shared => self.state.store.pending_annotations(session_id),
            Caller::User(u) => self
                .state
                .tenants
                .pending_annotations_for_user(&u.user_id, session_id),
        }
    }

    pub fn all_pending(&self) -> Result<Vec<Annotation>> {
        match self.caller {
            Caller::Shared => self.state.store.all_pending(),
            Caller::User(u) => self.state.tenants.all_pending_for_user(&u.user_id),
        }
    }

    // ── events ──────────────────────────────────────────────────────

    pub fn events_since(&self, session_id: &str, sequence: u64) -> Result<Vec<Event>> {
        match self.caller {
            Caller::Shared => self.state.store.events_since(session_id, sequence),
            Caller::User(u) => self
                .state
                .tenants
                .events_since_for_user(&u.user_id, session_id, sequence),
        }
    }

    pub fn events_after(&self, sequence: u64) -> Result<Vec<Event>> {
        match self.caller {
            Caller::Shared => self.state.store.events_after(sequence),
            Caller::User(u) => self.state.tenants.events_after_for_user(&u.user_id, sequence),
        }
    }

    pub fn subscribe_to_session<F>(&self, session_id: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.caller {
            Caller::Shared => self.state.store.bus().subscribe_to_session(session_id, handler),
            Caller::User(u) => self
                .state
                .tenants
                .user_bus()
                .subscribe_to_session_for_user(&u.user_id, session_id, handler),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.caller {
            Caller::Shared => self.state.store.bus().subscribe(handler),
            Caller::User(u) => self
                .state
                .tenants
                .user_bus()
                .subscribe_for_user(&u.user_id, handler),
        }
    }
}
