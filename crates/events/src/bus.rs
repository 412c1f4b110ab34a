use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use pm_domain::model::{Event, EventKind, EventPayload};
use pm_domain::trace::TraceEvent;

use crate::handler::{self, Handler, Subscription};
use crate::registry::Registry;
use crate::sequencer::Sequencer;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    next_id: AtomicU64,
    registry: RwLock<Registry>,
}

/// Global publish/subscribe broker.
///
/// Cloning is cheap and yields a handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    sequencer: Arc<Sequencer>,
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_sequencer(Arc::new(Sequencer::new()))
    }

    /// Build a bus that draws sequence numbers from `sequencer`.
    pub fn with_sequencer(sequencer: Arc<Sequencer>) -> Self {
        Self {
            sequencer,
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    pub fn sequencer(&self) -> Arc<Sequencer> {
        self.sequencer.clone()
    }

    /// Receive every event.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.registry.write().add_global(id, Arc::new(handler));
        self.subscription(id)
    }

    /// Receive events whose `session_id` equals `session_id`.
    pub fn subscribe_to_session<F>(&self, session_id: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .write()
            .add_session(session_id, id, Arc::new(handler));
        self.subscription(id)
    }

    fn subscription(&self, id: u64) -> Subscription {
        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.registry.write().remove(id);
            }
        })
    }

    /// Stamp, sequence and deliver an event. Returns the delivered event.
    ///
    /// Global subscribers run first, then subscribers of `session_id`, each
    /// in registration order. Subscriber failures are logged and never
    /// surface here.
    pub fn emit(
        &self,
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
            let targets: Vec<Handler> = self.inner.registry.read().targets(session_id);
            let listeners = handler::deliver(&targets, &event, "bus");
            TraceEvent::EventEmitted {
                kind: kind.to_string(),
                session_id: event.session_id.clone(),
                sequence,
                user_id: None,
                listeners,
            }
            .emit();
            event
        })
    }

    /// Sequence of the last emitted event.
    pub fn sequence(&self) -> u64 {
        self.sequencer.current()
    }

    /// Restore the counter after loading persisted events.
    pub fn set_sequence(&self, sequence: u64) {
        self.sequencer.restore(sequence);
    }

    /// Number of registered handlers, global and session-scoped.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.read().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pm_domain::model::Session;

    fn session() -> Session {
        Session::new("http://localhost:3000", None)
    }

    fn recorder(bus: &EventBus) -> (Subscription, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(move |e| {
            sink.lock().push(e.sequence);
            Ok(())
        });
        (sub, seen)
    }

    #[test]
    fn first_event_is_sequence_one() {
        let bus = EventBus::new();
        assert_eq!(bus.sequence(), 0);
        let s = session();
        let e1 = bus.emit(EventKind::SessionCreated, &s.id, s.clone());
        let e2 = bus.emit(EventKind::SessionUpdated, &s.id, s.clone());
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
        assert_eq!(bus.sequence(), 2);
    }

    #[test]
    fn session_subscribers_are_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        let _sub = bus.subscribe_to_session("a", move |e| {
            sink.lock().push(e.session_id.clone());
            Ok(())
        });

        bus.emit(EventKind::SessionUpdated, "a", session());
        bus.emit(EventKind::SessionUpdated, "b", session());
        bus.emit(EventKind::SessionUpdated, "a", session());

        assert_eq!(*hits.lock(), vec!["a".to_string(), "a".to_string()]);
    }

    #[test]
    fn global_runs_before_session_scope() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let _scoped = bus.subscribe_to_session("s", move |_| {
            o1.lock().push("session");
            Ok(())
        });
        let o2 = order.clone();
        let _global = bus.subscribe(move |_| {
            o2.lock().push("global");
            Ok(())
        });

        bus.emit(EventKind::SessionUpdated, "s", session());
        assert_eq!(*order.lock(), vec!["global", "session"]);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_others() {
        let bus = EventBus::new();
        let _err = bus.subscribe(|_| anyhow::bail!("boom"));
        let _panic = bus.subscribe(|_| panic!("handler exploded"));
        let (_ok, seen) = recorder(&bus);

        let e = bus.emit(EventKind::SessionCreated, "s", session());
        assert_eq!(*seen.lock(), vec![e.sequence]);

        bus.emit(EventKind::SessionCreated, "s", session());
        assert_eq!(seen.lock().len(), 2);
    }

    fn counting(count: Arc<Mutex<i32>>) -> impl Fn(&Event) -> anyhow::Result<()> + Send + Sync {
        move |_| {
            *count.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn same_callback_twice_is_delivered_twice() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let _a = bus.subscribe(counting(count.clone()));
        let _b = bus.subscribe(counting(count.clone()));

        bus.emit(EventKind::SessionCreated, "s", session());
        assert_eq!(*count.lock(), 2);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let bus = EventBus::new();
        let (sub, seen) = recorder(&bus);
        bus.emit(EventKind::SessionCreated, "s", session());
        drop(sub);
        bus.emit(EventKind::SessionCreated, "s", session());
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let bus = EventBus::new();
        let (sub, seen) = recorder(&bus);
        sub.detach();
        bus.emit(EventKind::SessionCreated, "s", session());
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn handler_can_emit_without_deadlock() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let _relay = bus.subscribe_to_session("a", move |e| {
            inner_bus.emit(EventKind::SessionUpdated, "b", e.payload.clone());
            Ok(())
        });
        let (_rec, seen) = recorder(&bus);

        let outer = bus.emit(EventKind::SessionCreated, "a", session());
        assert_eq!(outer.sequence, 1);
        assert_eq!(bus.sequence(), 2);
        let mut got = seen.lock().clone();
        got.sort_unstable();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn unsubscribe_during_delivery_applies_to_next_emit() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let taken = slot.clone();
        let _killer = bus.subscribe(move |_| {
            taken.lock().take();
            Ok(())
        });
        let (victim, seen) = recorder(&bus);
        *slot.lock() = Some(victim);

        bus.emit(EventKind::SessionCreated, "s", session());
        bus.emit(EventKind::SessionCreated, "s", session());
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn concurrent_emitters_deliver_in_sequence_order() {
        let bus = EventBus::new();
        let (_rec, seen) = recorder(&bus);

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        bus.emit(EventKind::SessionUpdated, &format!("s{t}"), session());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let got = seen.lock().clone();
        assert_eq!(got.len(), 400);
        assert!(got.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(bus.sequence(), 400);
    }
}
