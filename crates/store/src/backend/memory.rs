use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use pm_domain::model::{
    Annotation, AnnotationStatus, ApiKey, Event, Organization, Session, User,
};
use pm_domain::{Error, Result};

use super::{Backend, BackendKind};

#[derive(Default)]
struct State {
    sessions: HashMap<String, Session>,
    annotations: HashMap<String, Annotation>,
    /// Replay log keyed by sequence.
    events: BTreeMap<u64, StoredEvent>,
    organizations: HashMap<String, Organization>,
    users: HashMap<String, User>,
    api_keys: HashMap<String, ApiKey>,
}

struct StoredEvent {
    event: Event,
    owner: Option<String>,
}

impl State {
    fn owned_by(&self, session_id: &str, owner: &str) -> bool {
        self.sessions
            .get(session_id)
            .and_then(|s| s.user_id.as_deref())
            == Some(owner)
    }
}

/// Volatile backend. Nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_capture_order(list: &mut [Annotation]) {
    list.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.created_at.cmp(&b.created_at))
    });
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn insert_session(&self, session: &Session) -> Result<()> {
        self.state
            .write()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.state.read().sessions.get(id).cloned())
    }

    fn update_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.write();
        if let Some(slot) = state.sessions.get_mut(&session.id) {
            *slot = session.clone();
        }
        Ok(())
    }

    fn sessions(&self, owner: Option<&str>) -> Result<Vec<Session>> {
        let state = self.state.read();
        let mut list: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| owner.is_none() || s.user_id.as_deref() == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    fn insert_annotation(&self, annotation: &Annotation) -> Result<()> {
        self.state
            .write()
            .annotations
            .insert(annotation.id.clone(), annotation.clone());
        Ok(())
    }

    fn annotation(&self, id: &str) -> Result<Option<Annotation>> {
        Ok(self.state.read().annotations.get(id).cloned())
    }

    fn update_annotation(&self, annotation: &Annotation) -> Result<()> {
        let mut state = self.state.write();
        if let Some(slot) = state.annotations.get_mut(&annotation.id) {
            *slot = annotation.clone();
        }
        Ok(())
    }

    fn delete_annotation(&self, id: &str) -> Result<bool> {
        Ok(self.state.write().annotations.remove(id).is_some())
    }

    fn session_annotations(&self, session_id: &str, pending_only: bool) -> Result<Vec<Annotation>> {
        let state = self.state.read();
        let mut list: Vec<Annotation> = state
            .annotations
            .values()
            .filter(|a| a.session_id == session_id)
            .filter(|a| !pending_only || a.status == AnnotationStatus::Pending)
            .cloned()
            .collect();
        by_capture_order(&mut list);
        Ok(list)
    }

    fn pending_annotations(&self, owner: Option<&str>) -> Result<Vec<Annotation>> {
        let state = self.state.read();
        let mut list: Vec<Annotation> = state
            .annotations
            .values()
            .filter(|a| a.status == AnnotationStatus::Pending)
            .filter(|a| owner.map_or(true, |u| state.owned_by(&a.session_id, u)))
            .cloned()
            .collect();
        by_capture_order(&mut list);
        Ok(list)
    }

    fn append_event(&self, event: &Event, user_id: Option<&str>) -> Result<()> {
        let mut state = self.state.write();
        if state.events.contains_key(&event.sequence) {
            return Err(Error::Conflict(format!(
                "event sequence {} already recorded",
                event.sequence
            )));
        }
        state.events.insert(
            event.sequence,
            StoredEvent {
                event: event.clone(),
                owner: user_id.map(str::to_owned),
            },
        );
        Ok(())
    }

    fn events_since(&self, session_id: &str, after: u64) -> Result<Vec<Event>> {
        let state = self.state.read();
        Ok(state
            .events
            .range(after.saturating_add(1)..)
            .map(|(_, stored)| &stored.event)
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    fn events_after(&self, after: u64, owner: Option<&str>) -> Result<Vec<Event>> {
        let state = self.state.read();
        Ok(state
            .events
            .range(after.saturating_add(1)..)
            .map(|(_, stored)| stored)
            .filter(|stored| stored.owner.as_deref() == owner)
            .map(|stored| stored.event.clone())
            .collect())
    }

    fn max_sequence(&self) -> Result<u64> {
        Ok(self
            .state
            .read()
            .events
            .last_key_value()
            .map_or(0, |(&sequence, _)| sequence))
    }

    fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write();
        let before = state.events.len();
        state.events.retain(|_, stored| stored.event.timestamp >= cutoff);
        Ok(before - state.events.len())
    }

    fn insert_organization(&self, org: &Organization) -> Result<()> {
        self.state
            .write()
            .organizations
            .insert(org.id.clone(), org.clone());
        Ok(())
    }

    fn organization(&self, id: &str) -> Result<Option<Organization>> {
        Ok(self.state.read().organizations.get(id).cloned())
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.write();
        if state.users.values().any(|u| u.email == user.email) {
            return Err(Error::Conflict(format!("email {} already registered", user.email)));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    fn user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state.read().users.get(id).cloned())
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    fn users_by_org(&self, org_id: &str) -> Result<Vec<User>> {
        let state = self.state.read();
        let mut list: Vec<User> = state
            .users
            .values()
            .filter(|u| u.org_id == org_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        self.state
            .write()
            .api_keys
            .insert(key.id.clone(), key.clone());
        Ok(())
    }

    fn api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .state
            .read()
            .api_keys
            .values()
            .find(|k| k.key_hash == hash)
            .cloned())
    }

    fn api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let state = self.state.read();
        let mut list: Vec<ApiKey> = state
            .api_keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    fn delete_api_key(&self, id: &str) -> Result<bool> {
        Ok(self.state.write().api_keys.remove(id).is_some())
    }

    fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(key) = self.state.write().api_keys.get_mut(id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        *self.state.write() = State::default();
        Ok(())
    }
}
