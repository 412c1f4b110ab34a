//! Session and annotation lifecycle.
//!
//! Every successful mutation emits exactly one event and appends it to the
//! backend's replay log. Mutations hold a reentrant store-wide lock across
//! read, write, emit and append, so a subscriber may call back into the
//! store from its handler on the same thread.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::ReentrantMutex;

use pm_domain::config::StoreConfig;
use pm_domain::model::{
    Actor, Annotation, AnnotationPatch, AnnotationStatus, Event, EventKind, EventPayload,
    NewAnnotation, Session, SessionStatus, SessionWithAnnotations,
};
use pm_domain::trace::TraceEvent;
use pm_domain::Result;
use pm_events::{EventBus, UserEventBus};

use crate::backend::{open_backend, Backend, BackendKind};

/// Whose view an operation runs under.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Scope<'a> {
    /// Unscoped: every session is visible, events go to the global bus.
    All,
    /// Only sessions owned by this user are visible; events go to the
    /// user-scoped bus.
    User(&'a str),
}

impl<'a> Scope<'a> {
    fn owner(self) -> Option<&'a str> {
        match self {
            Self::All => None,
            Self::User(u) => Some(u),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Store {
    backend: Arc<dyn Backend>,
    bus: EventBus,
    user_bus: UserEventBus,
    write: ReentrantMutex<()>,
}

impl Store {
    /// Wrap an already-open backend. The user-scoped bus shares `bus`'s
    /// sequencer.
    pub fn new(backend: Arc<dyn Backend>, bus: EventBus) -> Self {
        let user_bus = UserEventBus::new(bus.sequencer());
        Self {
            backend,
            bus,
            user_bus,
            write: ReentrantMutex::new(()),
        }
    }

    /// Open the configured backend, restore the sequence counter and prune
    /// expired events.
    pub fn open(config: &StoreConfig, bus: EventBus) -> Result<Self> {
        let store = Self::new(open_backend(config), bus);
        store.restore(config.event_retention_days)?;
        Ok(store)
    }

    /// Continue numbering after the highest persisted sequence, then drop
    /// events older than `retention_days`.
    pub fn restore(&self, retention_days: u32) -> Result<()> {
        let _guard = self.write.lock();
        let last = self.backend.max_sequence()?;
        if last > 0 {
            self.bus.set_sequence(last);
            TraceEvent::SequenceRestored { sequence: last }.emit();
        }

        self.prune_expired(retention_days)?;
        Ok(())
    }

    /// Drop replay events older than `retention_days`. Returns the number
    /// removed.
    pub fn prune_expired(&self, retention_days: u32) -> Result<usize> {
        let _guard = self.write.lock();
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let removed = self.backend.prune_events(cutoff)?;
        if removed > 0 {
            tracing::info!(removed, retention_days, "pruned expired events");
            TraceEvent::EventsPruned {
                removed,
                retention_days,
            }
            .emit();
        }
        Ok(removed)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn user_bus(&self) -> &UserEventBus {
        &self.user_bus
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn lock(&self) -> parking_lot::ReentrantMutexGuard<'_, ()> {
        self.write.lock()
    }

    // ── sessions ────────────────────────────────────────────────────

    pub fn create_session(&self, url: &str, project_id: Option<String>) -> Result<Session> {
        self.create_session_in(Scope::All, url, project_id)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.session_in(Scope::All, id)
    }

    pub fn get_session_with_annotations(&self, id: &str) -> Result<Option<SessionWithAnnotations>> {
        self.session_with_annotations_in(Scope::All, id)
    }

    /// Newest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.backend.sessions(None)
    }

    pub fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<Option<Session>> {
        self.update_session_status_in(Scope::All, id, status)
    }

    // ── annotations ─────────────────────────────────────────────────

    /// `Ok(None)` (and no event) when the session does not exist.
    pub fn add_annotation(&self, session_id: &str, data: NewAnnotation) -> Result<Option<Annotation>> {
        self.add_annotation_in(Scope::All, session_id, data)
    }

    pub fn get_annotation(&self, id: &str) -> Result<Option<Annotation>> {
        self.annotation_in(Scope::All, id)
    }

    pub fn update_annotation(&self, id: &str, patch: AnnotationPatch) -> Result<Option<Annotation>> {
        self.update_annotation_in(Scope::All, id, patch)
    }

    pub fn update_annotation_status(
        &self,
        id: &str,
        status: AnnotationStatus,
        resolved_by: Option<Actor>,
    ) -> Result<Option<Annotation>> {
        self.update_annotation_status_in(Scope::All, id, status, resolved_by)
    }

    /// Append to the annotation's thread. The emitted `thread.message`
    /// event carries the message; the return value is the whole annotation.
    pub fn add_thread_message(
        &self,
        annotation_id: &str,
        role: Actor,
        content: &str,
    ) -> Result<Option<Annotation>> {
        self.add_thread_message_in(Scope::All, annotation_id, role, content)
    }

    pub fn pending_annotations(&self, session_id: &str) -> Result<Vec<Annotation>> {
        self.backend.session_annotations(session_id, true)
    }

    pub fn session_annotations(&self, session_id: &str) -> Result<Vec<Annotation>> {
        self.backend.session_annotations(session_id, false)
    }

    /// Pending annotations across every session.
    pub fn all_pending(&self) -> Result<Vec<Annotation>> {
        self.backend.pending_annotations(None)
    }

    pub fn delete_annotation(&self, id: &str) -> Result<Option<Annotation>> {
        self.delete_annotation_in(Scope::All, id)
    }

    // ── replay ──────────────────────────────────────────────────────

    /// Events for `session_id` with sequence strictly greater than
    /// `sequence`, ascending.
    pub fn events_since(&self, session_id: &str, sequence: u64) -> Result<Vec<Event>> {
        self.backend.events_since(session_id, sequence)
    }

    /// Unowned events of every session with sequence strictly greater
    /// than `sequence`, ascending. Feeds the global stream's replay.
    pub fn events_after(&self, sequence: u64) -> Result<Vec<Event>> {
        self.backend.events_after(sequence, None)
    }

    /// Clear all persisted state. The sequence counter keeps counting.
    pub fn close(&self) -> Result<()> {
        let _guard = self.write.lock();
        self.backend.reset()?;
        TraceEvent::StoreReset {
            backend: self.backend.kind().as_str().into(),
        }
        .emit();
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scoped implementations (shared with the tenant store)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn publish(
        &self,
        scope: Scope<'_>,
        kind: EventKind,
        session_id: &str,
        payload: impl Into<EventPayload>,
    ) -> Result<Event> {
        let event = match scope {
            Scope::All => self.bus.emit(kind, session_id, payload),
            Scope::User(user_id) => self.user_bus.emit_for_user(user_id, kind, session_id, payload),
        };
        self.backend.append_event(&event, scope.owner())?;
        Ok(event)
    }

    pub(crate) fn session_in(&self, scope: Scope<'_>, id: &str) -> Result<Option<Session>> {
        let session = self.backend.session(id)?;
        Ok(match scope {
            Scope::All => session,
            Scope::User(user_id) => session.filter(|s| s.user_id.as_deref() == Some(user_id)),
        })
    }

    pub(crate) fn annotation_in(&self, scope: Scope<'_>, id: &str) -> Result<Option<Annotation>> {
        let Some(annotation) = self.backend.annotation(id)? else {
            return Ok(None);
        };
        if let Scope::User(_) = scope {
            if self.session_in(scope, &annotation.session_id)?.is_none() {
                return Ok(None);
            }
        }
        Ok(Some(annotation))
    }

    pub(crate) fn create_session_in(
        &self,
        scope: Scope<'_>,
        url: &str,
        project_id: Option<String>,
    ) -> Result<Session> {
        let _guard = self.write.lock();
        let mut session = Session::new(url, project_id);
        session.user_id = scope.owner().map(str::to_owned);
        self.backend.insert_session(&session)?;
        tracing::debug!(session_id = %session.id, url, "session created");
        self.publish(scope, EventKind::SessionCreated, &session.id, session.clone())?;
        Ok(session)
    }

    pub(crate) fn session_with_annotations_in(
        &self,
        scope: Scope<'_>,
        id: &str,
    ) -> Result<Option<SessionWithAnnotations>> {
        let Some(session) = self.session_in(scope, id)? else {
            return Ok(None);
        };
        let annotations = self.backend.session_annotations(id, false)?;
        Ok(Some(SessionWithAnnotations {
            session,
            annotations,
        }))
    }

    pub(crate) fn update_session_status_in(
        &self,
        scope: Scope<'_>,
        id: &str,
        status: SessionStatus,
    ) -> Result<Option<Session>> {
        let _guard = self.write.lock();
        let Some(mut session) = self.session_in(scope, id)? else {
            return Ok(None);
        };
        session.status = status;
        session.updated_at = Some(Utc::now());
        self.backend.update_session(&session)?;

        let kind = if status == SessionStatus::Closed {
            EventKind::SessionClosed
        } else {
            EventKind::SessionUpdated
        };
        self.publish(scope, kind, id, session.clone())?;
        Ok(Some(session))
    }

    pub(crate) fn add_annotation_in(
        &self,
        scope: Scope<'_>,
        session_id: &str,
        data: NewAnnotation,
    ) -> Result<Option<Annotation>> {
        let _guard = self.write.lock();
        if self.session_in(scope, session_id)?.is_none() {
            return Ok(None);
        }
        let annotation = Annotation::create(session_id, data);
        self.backend.insert_annotation(&annotation)?;
        tracing::debug!(session_id, annotation_id = %annotation.id, "annotation created");
        self.publish(scope, EventKind::AnnotationCreated, session_id, annotation.clone())?;
        Ok(Some(annotation))
    }

    pub(crate) fn update_annotation_in(
        &self,
        scope: Scope<'_>,
        id: &str,
        patch: AnnotationPatch,
    ) -> Result<Option<Annotation>> {
        let _guard = self.write.lock();
        let Some(mut annotation) = self.annotation_in(scope, id)? else {
            return Ok(None);
        };
        annotation.apply_patch(patch, Utc::now());
        self.backend.update_annotation(&annotation)?;
        self.publish(
            scope,
            EventKind::AnnotationUpdated,
            &annotation.session_id,
            annotation.clone(),
        )?;
        Ok(Some(annotation))
    }

    pub(crate) fn update_annotation_status_in(
        &self,
        scope: Scope<'_>,
        id: &str,
        status: AnnotationStatus,
        resolved_by: Option<Actor>,
    ) -> Result<Option<Annotation>> {
        let _guard = self.write.lock();
        let Some(mut annotation) = self.annotation_in(scope, id)? else {
            return Ok(None);
        };
        annotation.set_status(status, resolved_by, Utc::now());
        self.backend.update_annotation(&annotation)?;
        tracing::debug!(annotation_id = id, status = status.as_str(), "annotation status changed");
        self.publish(
            scope,
            EventKind::AnnotationUpdated,
            &annotation.session_id,
            annotation.clone(),
        )?;
        Ok(Some(annotation))
    }

    pub(crate) fn add_thread_message_in(
        &self,
        scope: Scope<'_>,
        annotation_id: &str,
        role: Actor,
        content: &str,
    ) -> Result<Option<Annotation>> {
        let _guard = self.write.lock();
        let Some(mut annotation) = self.annotation_in(scope, annotation_id)? else {
            return Ok(None);
        };
        let message = annotation.push_message(role, content);
        self.backend.update_annotation(&annotation)?;
        self.publish(scope, EventKind::ThreadMessage, &annotation.session_id, message)?;
        Ok(Some(annotation))
    }

    pub(crate) fn delete_annotation_in(&self, scope: Scope<'_>, id: &str) -> Result<Option<Annotation>> {
        let _guard = self.write.lock();
        let Some(annotation) = self.annotation_in(scope, id)? else {
            return Ok(None);
        };
        if !self.backend.delete_annotation(id)? {
            return Ok(None);
        }
        self.publish(
            scope,
            EventKind::AnnotationDeleted,
            &annotation.session_id,
            annotation.clone(),
        )?;
        Ok(Some(annotation))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use parking_lot::Mutex;

    fn store() -> Store {
        Store::new(Arc::new(MemoryBackend::new()), EventBus::new())
    }

    fn data(comment: &str) -> NewAnnotation {
        NewAnnotation {
            comment: comment.into(),
            element: "button".into(),
            element_path: "main > button".into(),
            timestamp: 1_700_000_000_000,
            ..NewAnnotation::default()
        }
    }

    fn record(store: &Store) -> (pm_events::Subscription, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = store.bus().subscribe(move |e| {
            sink.lock().push(e.clone());
            Ok(())
        });
        (sub, seen)
    }

    #[test]
    fn create_session_emits_created() {
        let store = store();
        let (_sub, seen) = record(&store);
        let session = store.create_session("http://localhost:3000", None).unwrap();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SessionCreated);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[0].session_id, session.id);
        assert_eq!(store.get_session(&session.id).unwrap(), Some(session));
    }

    #[test]
    fn annotation_on_unknown_session_is_absent_and_silent() {
        let store = store();
        let (_sub, seen) = record(&store);
        assert!(store.add_annotation("nope", data("x")).unwrap().is_none());
        assert!(seen.lock().is_empty());
        assert_eq!(store.bus().sequence(), 0);
    }

    #[test]
    fn new_annotations_start_pending() {
        let store = store();
        let s = store.create_session("http://localhost", None).unwrap();
        let a = store.add_annotation(&s.id, data("x")).unwrap().unwrap();
        assert_eq!(a.status, AnnotationStatus::Pending);
        assert!(a.resolved_at.is_none());
        assert_eq!(store.pending_annotations(&s.id).unwrap(), vec![a.clone()]);
        assert_eq!(store.all_pending().unwrap(), vec![a]);
    }

    #[test]
    fn terminal_status_stamps_resolution() {
        let store = store();
        let s = store.create_session("http://localhost", None).unwrap();
        let a = store.add_annotation(&s.id, data("x")).unwrap().unwrap();

        let acked = store
            .update_annotation_status(&a.id, AnnotationStatus::Acknowledged, Some(Actor::Human))
            .unwrap()
            .unwrap();
        assert!(acked.resolved_at.is_none());
        assert!(acked.resolved_by.is_none());

        let dismissed = store
            .update_annotation_status(&a.id, AnnotationStatus::Dismissed, None)
            .unwrap()
            .unwrap();
        assert!(dismissed.resolved_at.is_some());
        assert_eq!(dismissed.resolved_by, Some(Actor::Agent));
        assert!(store.pending_annotations(&s.id).unwrap().is_empty());
    }

    #[test]
    fn patch_to_resolved_gets_stamped() {
        let store = store();
        let s = store.create_session("http://localhost", None).unwrap();
        let a = store.add_annotation(&s.id, data("x")).unwrap().unwrap();
        let patched = store
            .update_annotation(
                &a.id,
                AnnotationPatch {
                    status: Some(AnnotationStatus::Resolved),
                    comment: Some("fixed in abc123".into()),
                    ..AnnotationPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(patched.comment, "fixed in abc123");
        assert!(patched.resolved_at.is_some());
        assert_eq!(patched.resolved_by, Some(Actor::Agent));
    }

    #[test]
    fn closing_a_session_emits_closed() {
        let store = store();
        let (_sub, seen) = record(&store);
        let s = store.create_session("http://localhost", None).unwrap();
        store.update_session_status(&s.id, SessionStatus::Approved).unwrap();
        let closed = store
            .update_session_status(&s.id, SessionStatus::Closed)
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(closed.updated_at.is_some());

        let kinds: Vec<EventKind> = seen.lock().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::SessionCreated,
                EventKind::SessionUpdated,
                EventKind::SessionClosed
            ]
        );
        assert!(store
            .update_session_status("missing", SessionStatus::Closed)
            .unwrap()
            .is_none());
    }

    #[test]
    fn thread_message_event_carries_the_message() {
        let store = store();
        let s = store.create_session("http://localhost", None).unwrap();
        let a = store.add_annotation(&s.id, data("x")).unwrap().unwrap();
        let (_sub, seen) = record(&store);

        let updated = store
            .add_thread_message(&a.id, Actor::Agent, "which breakpoint?")
            .unwrap()
            .unwrap();
        assert_eq!(updated.thread.len(), 1);

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ThreadMessage);
        match &events[0].payload {
            EventPayload::ThreadMessage(m) => {
                assert_eq!(m.content, "which breakpoint?");
                assert_eq!(m.id, updated.thread[0].id);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn double_delete_emits_once() {
        let store = store();
        let s = store.create_session("http://localhost", None).unwrap();
        let a = store.add_annotation(&s.id, data("x")).unwrap().unwrap();
        let (_sub, seen) = record(&store);

        let removed = store.delete_annotation(&a.id).unwrap();
        assert_eq!(removed.as_ref().map(|r| r.id.as_str()), Some(a.id.as_str()));
        assert!(store.delete_annotation(&a.id).unwrap().is_none());

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::AnnotationDeleted);
        assert!(store.get_annotation(&a.id).unwrap().is_none());
    }

    #[test]
    fn events_since_is_exclusive_and_scoped() {
        let store = store();
        let s1 = store.create_session("http://localhost/a", None).unwrap();
        let s2 = store.create_session("http://localhost/b", None).unwrap();
        store.add_annotation(&s1.id, data("one")).unwrap();
        store.add_annotation(&s2.id, data("two")).unwrap();
        store.add_annotation(&s1.id, data("three")).unwrap();

        let all: Vec<u64> = store
            .events_since(&s1.id, 0)
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(all, vec![1, 3, 5]);

        let after: Vec<u64> = store
            .events_since(&s1.id, 3)
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(after, vec![5]);
        assert_eq!(store.events_since(&s1.id, 3).unwrap(), store.events_since(&s1.id, 3).unwrap());
        assert!(store.events_since(&s1.id, 5).unwrap().is_empty());
    }

    #[test]
    fn events_after_spans_sessions() {
        let store = store();
        let s1 = store.create_session("http://localhost/a", None).unwrap();
        let s2 = store.create_session("http://localhost/b", None).unwrap();
        store.add_annotation(&s1.id, data("one")).unwrap();
        store.add_annotation(&s2.id, data("two")).unwrap();

        let seqs: Vec<u64> = store
            .events_after(2)
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(store.events_after(4).unwrap().is_empty());
    }

    #[test]
    fn prune_expired_keeps_recent_events() {
        let store = store();
        let s = store.create_session("http://localhost", None).unwrap();
        assert_eq!(store.prune_expired(7).unwrap(), 0);
        assert_eq!(store.events_since(&s.id, 0).unwrap().len(), 1);
    }

    #[test]
    fn handler_may_read_and_write_the_store() {
        let store = Arc::new(store());
        let s = store.create_session("http://localhost", None).unwrap();
        let a = store.add_annotation(&s.id, data("x")).unwrap().unwrap();

        let weak = Arc::downgrade(&store);
        let _auto_ack = store.bus().subscribe(move |e| {
            let Some(store) = weak.upgrade() else {
                return Ok(());
            };
            if e.kind == EventKind::ThreadMessage {
                if let EventPayload::ThreadMessage(m) = &e.payload {
                    if m.role == Actor::Human {
                        let annotation = store
                            .pending_annotations(&e.session_id)?
                            .into_iter()
                            .next();
                        if let Some(annotation) = annotation {
                            store.update_annotation_status(
                                &annotation.id,
                                AnnotationStatus::Acknowledged,
                                None,
                            )?;
                        }
                    }
                }
            }
            Ok(())
        });

        store.add_thread_message(&a.id, Actor::Human, "ping").unwrap();
        let now = store.get_annotation(&a.id).unwrap().unwrap();
        assert_eq!(now.status, AnnotationStatus::Acknowledged);
        assert_eq!(store.events_since(&s.id, 0).unwrap().len(), 4);
    }

    #[test]
    fn restore_continues_after_persisted_sequence() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        {
            let first = Store::new(backend.clone(), EventBus::new());
            let s = first.create_session("http://localhost", None).unwrap();
            first.add_annotation(&s.id, data("x")).unwrap();
        }
        let second = Store::new(backend, EventBus::new());
        second.restore(7).unwrap();
        assert_eq!(second.bus().sequence(), 2);
        let s = second.create_session("http://localhost", None).unwrap();
        assert_eq!(second.events_since(&s.id, 0).unwrap()[0].sequence, 3);
    }

    #[test]
    fn close_clears_everything() {
        let store = store();
        let s = store.create_session("http://localhost", None).unwrap();
        store.add_annotation(&s.id, data("x")).unwrap();
        store.close().unwrap();
        assert!(store.list_sessions().unwrap().is_empty());
        assert!(store.all_pending().unwrap().is_empty());
        assert!(store.events_since(&s.id, 0).unwrap().is_empty());
    }
}
