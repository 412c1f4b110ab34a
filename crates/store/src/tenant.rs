//! Multi-tenant view over [`Store`].
//!
//! Sessions created here are owned by a user; every read and mutation is
//! filtered by that ownership, and a session or annotation owned by someone
//! else is indistinguishable from one that does not exist. Events go through
//! the user-scoped bus only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pm_domain::model::{
    Actor, Annotation, AnnotationPatch, AnnotationStatus, ApiKey, Event, NewAnnotation,
    Organization, Session, SessionStatus, SessionWithAnnotations, User, UserContext, UserRole,
};
use pm_domain::trace::TraceEvent;
use pm_domain::{Error, Result};
use pm_events::UserEventBus;

use crate::api_key::{display_prefix, generate_api_key, hash_api_key, is_valid_api_key_format};
use crate::store::{Scope, Store};

/// A freshly minted key. `raw_key` is never retrievable again.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApiKey {
    pub api_key: ApiKey,
    pub raw_key: String,
}

fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

pub struct TenantStore {
    store: Arc<Store>,
}

impl TenantStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn user_bus(&self) -> &UserEventBus {
        self.store.user_bus()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Organizations & users
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn create_organization(&self, name: &str) -> Result<Organization> {
        let org = Organization {
            id: prefixed_id("org"),
            name: name.to_owned(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.store.backend().insert_organization(&org)?;
        tracing::info!(org_id = %org.id, name, "organization created");
        Ok(org)
    }

    pub fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        self.store.backend().organization(id)
    }

    /// Register a user. Fails with [`Error::Conflict`] when the email is
    /// taken or the organization does not exist.
    pub fn create_user(&self, email: &str, org_id: &str, role: Option<UserRole>) -> Result<User> {
        let _guard = self.store.lock();
        let backend = self.store.backend();
        if backend.organization(org_id)?.is_none() {
            return Err(Error::Conflict(format!("unknown organization {org_id}")));
        }
        if backend.user_by_email(email)?.is_some() {
            return Err(Error::Conflict(format!("email {email} already registered")));
        }
        let user = User {
            id: prefixed_id("user"),
            email: email.to_owned(),
            org_id: org_id.to_owned(),
            role: role.unwrap_or_default(),
            created_at: Utc::now(),
            updated_at: None,
        };
        backend.insert_user(&user)?;
        tracing::info!(user_id = %user.id, org_id, role = user.role.as_str(), "user created");
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.store.backend().user(id)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.store.backend().user_by_email(email)
    }

    pub fn users_by_org(&self, org_id: &str) -> Result<Vec<User>> {
        self.store.backend().users_by_org(org_id)
    }

    pub fn user_context(&self, user_id: &str) -> Result<Option<UserContext>> {
        Ok(self.get_user(user_id)?.as_ref().map(UserContext::from))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // API keys
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn create_api_key(
        &self,
        user_id: &str,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreatedApiKey> {
        if self.get_user(user_id)?.is_none() {
            return Err(Error::Conflict(format!("unknown user {user_id}")));
        }
        let raw_key = generate_api_key();
        let api_key = ApiKey {
            id: prefixed_id("key"),
            key_prefix: display_prefix(&raw_key),
            key_hash: hash_api_key(&raw_key),
            user_id: user_id.to_owned(),
            name: name.to_owned(),
            created_at: Utc::now(),
            expires_at,
            last_used_at: None,
        };
        self.store.backend().insert_api_key(&api_key)?;
        TraceEvent::ApiKeyCreated {
            key_id: api_key.id.clone(),
            user_id: user_id.to_owned(),
            key_prefix: api_key.key_prefix.clone(),
        }
        .emit();
        Ok(CreatedApiKey { api_key, raw_key })
    }

    pub fn api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        self.store.backend().api_key_by_hash(hash)
    }

    /// Newest first.
    pub fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        self.store.backend().api_keys(user_id)
    }

    pub fn delete_api_key(&self, id: &str) -> Result<bool> {
        self.store.backend().delete_api_key(id)
    }

    pub fn touch_api_key(&self, id: &str) -> Result<()> {
        self.store.backend().touch_api_key(id, Utc::now())
    }

    /// Resolve a raw bearer key to its owner.
    ///
    /// Malformed keys are rejected before any lookup. Unknown, expired, or
    /// orphaned keys yield `Ok(None)`. A successful match stamps
    /// `last_used_at`.
    pub fn authenticate(&self, raw: &str) -> Result<Option<UserContext>> {
        if !is_valid_api_key_format(raw) {
            reject("malformed");
            return Ok(None);
        }
        let Some(key) = self.api_key_by_hash(&hash_api_key(raw))? else {
            reject("unknown");
            return Ok(None);
        };
        if key.is_expired(Utc::now()) {
            reject("expired");
            return Ok(None);
        }
        self.touch_api_key(&key.id)?;
        let context = self.user_context(&key.user_id)?;
        if context.is_none() {
            reject("orphaned");
        }
        Ok(context)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // User-scoped sessions and annotations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn create_session_for_user(
        &self,
        user_id: &str,
        url: &str,
        project_id: Option<String>,
    ) -> Result<Session> {
        self.store.create_session_in(Scope::User(user_id), url, project_id)
    }

    pub fn list_sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        self.store.backend().sessions(Some(user_id))
    }

    pub fn get_session_for_user(&self, user_id: &str, session_id: &str) -> Result<Option<Session>> {
        self.store.session_in(Scope::User(user_id), session_id)
    }

    pub fn get_session_with_annotations_for_user(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionWithAnnotations>> {
        self.store
            .session_with_annotations_in(Scope::User(user_id), session_id)
    }

    pub fn update_session_status_for_user(
        &self,
        user_id: &str,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<Option<Session>> {
        self.store
            .update_session_status_in(Scope::User(user_id), session_id, status)
    }

    pub fn add_annotation_for_user(
        &self,
        user_id: &str,
        session_id: &str,
        data: NewAnnotation,
    ) -> Result<Option<Annotation>> {
        self.store
            .add_annotation_in(Scope::User(user_id), session_id, data)
    }

    pub fn get_annotation_for_user(&self, user_id: &str, id: &str) -> Result<Option<Annotation>> {
        self.store.annotation_in(Scope::User(user_id), id)
    }

    pub fn update_annotation_for_user(
        &self,
        user_id: &str,
        id: &str,
        patch: AnnotationPatch,
    ) -> Result<Option<Annotation>> {
        self.store.update_annotation_in(Scope::User(user_id), id, patch)
    }

    pub fn update_annotation_status_for_user(
        &self,
        user_id: &str,
        id: &str,
        status: AnnotationStatus,
        resolved_by: Option<Actor>,
    ) -> Result<Option<Annotation>> {
        self.store
            .update_annotation_status_in(Scope::User(user_id), id, status, resolved_by)
    }

    pub fn add_thread_message_for_user(
        &self,
        user_id: &str,
        annotation_id: &str,
        role: Actor,
        content: &str,
    ) -> Result<Option<Annotation>> {
        self.store
            .add_thread_message_in(Scope::User(user_id), annotation_id, role, content)
    }

    pub fn delete_annotation_for_user(&self, user_id: &str, id: &str) -> Result<Option<Annotation>> {
        self.store.delete_annotation_in(Scope::User(user_id), id)
    }

    /// Empty when the session is not owned by `user_id`.
    pub fn pending_annotations_for_user(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Annotation>> {
        if self.get_session_for_user(user_id, session_id)?.is_none() {
            return Ok(Vec::new());
        }
        self.store.pending_annotations(session_id)
    }

    pub fn all_pending_for_user(&self, user_id: &str) -> Result<Vec<Annotation>> {
        self.store.backend().pending_annotations(Some(user_id))
    }

    /// Replay for a session the user owns; empty otherwise.
    pub fn events_since_for_user(
        &self,
        user_id: &str,
        session_id: &str,
        sequence: u64,
    ) -> Result<Vec<Event>> {
        if self.get_session_for_user(user_id, session_id)?.is_none() {
            return Ok(Vec::new());
        }
        self.store.events_since(session_id, sequence)
    }

    /// Replay across every session the user owns.
    pub fn events_after_for_user(&self, user_id: &str, sequence: u64) -> Result<Vec<Event>> {
        self.store.backend().events_after(sequence, Some(user_id))
    }
}

fn reject(reason: &str) {
    tracing::debug!(reason, "api key rejected");
    TraceEvent::ApiKeyRejected {
        reason: reason.to_owned(),
    }
    .emit();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
