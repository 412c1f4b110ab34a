//! Server-sent event streams.
//!
//! Each frame carries `event: <type>`, `id: <sequence>` and the envelope
//! JSON as `data`. A reconnecting client sends the last id it saw in
//! `Last-Event-ID` and receives the persisted events after it before the
//! live feed resumes.
//!
//! The bus subscription is taken *before* the replay query so nothing
//! emitted in between is lost; the overlap is dropped by sequence.
//!
//! Live events pass through a bounded per-connection queue. When a slow
//! client lets it fill up, later events are discarded, the queued ones are
//! flushed, and the stream ends with a `warning` frame so the client
//! reconnects from the last id it received.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use pm_domain::model::{Event, EventPayload};
use pm_events::Subscription;

use super::auth::Caller;
use super::{api_error, internal_error};
use crate::state::{AppState, ListenerGuard};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Marks the connection as an agent listener in `/status`.
    #[serde(default)]
    pub agent: bool,
    /// Host (`localhost:3000`) to filter the global stream by.
    #[serde(default)]
    pub domain: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sessions/:id/events (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn session_events(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let scoped = state.scoped(&caller);
    match scoped.session(&session_id) {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => return internal_error(e),
    }

    let (outbox, live) = live_queue(state.config.stream.buffer);
    let subscription = scoped.subscribe_to_session(&session_id, outbox.forward());

    let after = last_event_id(&headers);
    let mut replay = match after {
        Some(seq) => match scoped.events_since(&session_id, seq) {
            Ok(events) => events,
            Err(e) => return internal_error(e),
        },
        None => Vec::new(),
    };
    let dropped = trim_replay(&mut replay, state.config.stream.replay_limit);

    tracing::debug!(
        session_id = %session_id,
        agent = query.agent,
        replayed = replay.len(),
        dropped,
        "session stream opened"
    );

    let feed = Feed {
        live,
        replay,
        dropped,
        after: after.unwrap_or(0),
        greeting: "connected".into(),
        filter: None,
        _subscription: subscription,
        _listener: state.listeners.track(query.agent),
    };
    sse(&state, feed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /events?domain=… (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every event the caller may see, optionally limited to sessions whose
/// URL host equals `domain`. `Last-Event-ID` replays across sessions.
pub async fn domain_events(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let domain = query.domain.filter(|d| !d.trim().is_empty());

    let (outbox, live) = live_queue(state.config.stream.buffer);
    let scoped = state.scoped(&caller);
    let subscription = scoped.subscribe(outbox.forward());

    let after = last_event_id(&headers);
    let mut replay = match after {
        Some(seq) => match scoped.events_after(seq) {
            Ok(events) => events,
            Err(e) => return internal_error(e),
        },
        None => Vec::new(),
    };

    let greeting = match &domain {
        Some(d) => format!("connected to domain {d}"),
        None => "connected".into(),
    };
    let mut filter = domain.map(|domain| HostFilter {
        domain,
        state: state.clone(),
        caller: caller.clone(),
        hosts: HashMap::new(),
    });
    if let Some(filter) = filter.as_mut() {
        replay.retain(|event| filter.matches(event));
    }
    let dropped = trim_replay(&mut replay, state.config.stream.replay_limit);

    tracing::debug!(
        domain = ?filter.as_ref().map(|f| f.domain.as_str()),
        agent = query.agent,
        replayed = replay.len(),
        dropped,
        "domain stream opened"
    );

    let feed = Feed {
        live,
        replay,
        dropped,
        after: after.unwrap_or(0),
        greeting,
        filter,
        _subscription: subscription,
        _listener: state.listeners.track(query.agent),
    };
    sse(&state, feed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sending half of a connection's live queue, owned by the bus handler.
struct Outbox {
    tx: mpsc::Sender<Event>,
    missed: Arc<AtomicUsize>,
}

/// Receiving half, owned by the stream.
struct Live {
    rx: mpsc::Receiver<Event>,
    missed: Arc<AtomicUsize>,
}

fn live_queue(capacity: usize) -> (Outbox, Live) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let missed = Arc::new(AtomicUsize::new(0));
    (
        Outbox {
            tx,
            missed: missed.clone(),
        },
        Live { rx, missed },
    )
}

impl Outbox {
    /// Bus handler that queues events for the connection. Once the queue
    /// overflows every later event is counted instead of queued, so the
    /// queued events stay a gap-free prefix. A closed receiver means the
    /// client is gone; the subscription is dropped with the stream.
    fn forward(self) -> impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static {
        move |event: &Event| {
            if self.missed.load(Ordering::Acquire) > 0 {
                self.missed.fetch_add(1, Ordering::AcqRel);
                return Ok(());
            }
            if let Err(TrySendError::Full(_)) = self.tx.try_send(event.clone()) {
                self.missed.fetch_add(1, Ordering::AcqRel);
            }
            Ok(())
        }
    }
}

/// Everything one connection owns. Dropping it unsubscribes from the bus
/// and releases the listener count.
struct Feed {
    live: Live,
    replay: Vec<Event>,
    dropped: usize,
    after: u64,
    greeting: String,
    filter: Option<HostFilter>,
    _subscription: Subscription,
    _listener: ListenerGuard,
}

fn sse(state: &AppState, feed: Feed) -> Response {
    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.config.stream.keep_alive_secs))
        .text("ping");
    Sse::new(event_stream(feed))
        .keep_alive(keep_alive)
        .into_response()
}

fn warning(missed: usize) -> SseEvent {
    let msg = format!("{{\"warning\":\"missed {missed} events\"}}");
    SseEvent::default().event("warning").data(msg)
}

fn event_stream(mut feed: Feed) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    async_stream::stream! {
        yield Ok(SseEvent::default().comment(&feed.greeting));

        if feed.dropped > 0 {
            yield Ok(warning(feed.dropped));
        }

        let mut last = feed.after;
        for event in std::mem::take(&mut feed.replay) {
            last = last.max(event.sequence);
            yield Ok(frame(&event));
        }

        loop {
            let event = match feed.live.rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => {
                    let missed = feed.live.missed.load(Ordering::Acquire);
                    if missed > 0 {
                        tracing::warn!(missed, last_sequence = last, "client fell behind, closing stream");
                        yield Ok(warning(missed));
                        break;
                    }
                    match feed.live.rx.recv().await {
                        Some(event) => event,
                        None => break,
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            };
            if event.sequence <= last {
                continue;
            }
            last = event.sequence;
            if let Some(filter) = feed.filter.as_mut() {
                if !filter.matches(&event) {
                    continue;
                }
            }
            yield Ok(frame(&event));
        }
    }
}

fn frame(event: &Event) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default()
        .event(event.kind.as_str())
        .id(event.sequence.to_string())
        .data(data)
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Keep the newest `limit` events; returns how many were dropped.
fn trim_replay(events: &mut Vec<Event>, limit: usize) -> usize {
    let dropped = events.len().saturating_sub(limit);
    events.drain(..dropped);
    dropped
}

/// Matches events to sessions hosted on one domain. Session URLs never
/// change, so each session's verdict is cached.
struct HostFilter {
    domain: String,
    state: AppState,
    caller: Caller,
    hosts: HashMap<String, bool>,
}

impl HostFilter {
    fn matches(&mut self, event: &Event) -> bool {
        if let Some(&hit) = self.hosts.get(&event.session_id) {
            return hit;
        }
        let hit = match &event.payload {
            EventPayload::Session(session) => session.host() == Some(self.domain.as_str()),
            _ => match self.state.scoped(&self.caller).session(&event.session_id) {
                Ok(Some(session)) => session.host() == Some(self.domain.as_str()),
                Ok(None) => return false,
                Err(e) => {
                    tracing::warn!(session_id = %event.session_id, error = %e, "session lookup failed");
                    return false;
                }
            },
        };
        self.hosts.insert(event.session_id.clone(), hit);
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pm_domain::model::{EventKind, Session};

    fn event(sequence: u64) -> Event {
        let session = Session::new("http://localhost:3000", None);
        Event {
            kind: EventKind::SessionUpdated,
            timestamp: Utc::now(),
            session_id: session.id.clone(),
            sequence,
            payload: session.into(),
        }
    }

    #[test]
    fn replay_keeps_the_newest_events() {
        let mut events: Vec<Event> = (1..=5).map(event).collect();
        assert_eq!(trim_replay(&mut events, 2), 3);
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![4, 5]);

        assert_eq!(trim_replay(&mut events, 10), 0);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn overflow_keeps_a_gap_free_prefix() {
        let (outbox, mut live) = live_queue(2);
        let handler = outbox.forward();
        for seq in 1..=5 {
            handler(&event(seq)).unwrap();
        }

        assert_eq!(live.rx.try_recv().unwrap().sequence, 1);
        assert_eq!(live.rx.try_recv().unwrap().sequence, 2);
        // Room again, but nothing after the gap is queued.
        handler(&event(6)).unwrap();
        assert!(live.rx.try_recv().is_err());
        assert_eq!(live.missed.load(Ordering::Acquire), 4);
    }

    #[test]
    fn last_event_id_must_be_numeric() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), None);

        headers.insert("last-event-id", " 42 ".parse().unwrap());
        assert_eq!(last_event_id(&headers), Some(42));

        headers.insert("last-event-id", "abc".parse().unwrap());
        assert_eq!(last_event_id(&headers), None);
    }
}
