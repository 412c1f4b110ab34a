use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use pm_domain::model::{Event, EventKind, EventPayload};
use pm_domain::trace::TraceEvent;

use crate::handler::{self, Handler, Subscription};
use crate::registry::Registry;
use crate::sequencer::Sequencer;

struct Inner {
    next_id: AtomicU64,
    users: RwLock<HashMap<String, Registry>>,
}

/// Event bus partitioned by user.
///
/// Events emitted for one user never reach another user's handlers. The
/// sequencer is shared with the global [`EventBus`](crate::EventBus) so
/// sequence numbers from both buses interleave without gaps or repeats.
#[derive(Clone)]
pub struct UserEventBus {
    sequencer: Arc<Sequencer>,
    inner: Arc<Inner>,
}

impl UserEventBus {
    pub fn new(sequencer: Arc<Sequencer>) -> Self {
        Self {
            sequencer,
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                users: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Receive every event emitted for `user_id`.
    pub fn subscribe_for_user<F>(&self, user_id: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .users
            .write()
            .entry(user_id.to_owned())
            .or_default()
            .add_global(id, Arc::new(handler));
        self.subscription(user_id, id)
    }

    /// Receive events emitted for `user_id` on `session_id`.
    pub fn subscribe_to_session_for_user<F>(
        &self,
        user_id: &str,
        session_id: &str,
        handler: F,
    ) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .users
            .write()
            .entry(user_id.to_owned())
            .or_default()
            .add_session(session_id, id, Arc::new(handler));
        self.subscription(user_id, id)
    }

    fn subscription(&self, user_id: &str, id: u64) -> Subscription {
        let inner = Arc::downgrade(&self.inner);
        let user_id = user_id.to_owned();
        Subscription::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut users = inner.users.write();
            if let Some(registry) = users.get_mut(&user_id) {
                registry.remove(id);
                if registry.is_empty() {
                    users.remove(&user_id);
                }
            }
        })
    }

    /// Deliver an event to `user_id`'s global handlers, then to their
    /// handlers for `session_id`.
    pub fn emit_for_user(
        &self,
        user_id: &str,
        kind: EventKind,
        session_id: &str,
        payload: impl Into<EventPayload>,
    ) -> Event {
        let payload = payload.into();
        self.sequencer.with_next(|sequence| {
            let event = Event {
                kind,
                timestamp: Utc::now(),
                session_id: session_id.to_owned(),
                sequence,
                payload,
            };
            let targets: Vec<Handler> = self
                .inner
                .users
                .read()
                .get(user_id)
                .map(|r| r.targets(session_id))
                .unwrap_or_default();
            let listeners = handler::deliver(&targets, &event, "user");
            TraceEvent::EventEmitted {
                kind: kind.to_string(),
                session_id: event.session_id.clone(),
                sequence,
                user_id: Some(user_id.to_owned()),
                listeners,
            }
            .emit();
            event
        })
    }

    pub fn has_listeners_for_user(&self, user_id: &str) -> bool {
        self.listener_count_for_user(user_id) > 0
    }

    /// Global plus session-scoped handlers registered for `user_id`.
    pub fn listener_count_for_user(&self, user_id: &str) -> usize {
        self.inner
            .users
            .read()
            .get(user_id)
            .map(Registry::len)
            .unwrap_or(0)
    }

    pub fn sequence(&self) -> u64 {
        self.sequencer.current()
    }
}
