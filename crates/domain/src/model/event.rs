use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::annotation::{Annotation, ThreadMessage};
use super::session::Session;
use crate::error::Result;

/// Closed set of lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "annotation.created")]
    AnnotationCreated,
    #[serde(rename = "annotation.updated")]
    AnnotationUpdated,
    #[serde(rename = "annotation.deleted")]
    AnnotationDeleted,
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "session.closed")]
    SessionClosed,
    #[serde(rename = "thread.message")]
    ThreadMessage,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnnotationCreated => "annotation.created",
            Self::AnnotationUpdated => "annotation.updated",
            Self::AnnotationDeleted => "annotation.deleted",
            Self::SessionCreated => "session.created",
            Self::SessionUpdated => "session.updated",
            Self::SessionClosed => "session.closed",
            Self::ThreadMessage => "thread.message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "annotation.created" => Some(Self::AnnotationCreated),
            "annotation.updated" => Some(Self::AnnotationUpdated),
            "annotation.deleted" => Some(Self::AnnotationDeleted),
            "session.created" => Some(Self::SessionCreated),
            "session.updated" => Some(Self::SessionUpdated),
            "session.closed" => Some(Self::SessionClosed),
            "thread.message" => Some(Self::ThreadMessage),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity an event carries. Serialized without a tag; the envelope's
/// `type` tells consumers which shape to expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Annotation(Annotation),
    Session(Session),
    ThreadMessage(ThreadMessage),
}

impl EventPayload {
    /// Rebuild a payload from its persisted JSON using the event kind to
    /// pick the shape.
    pub fn from_json(kind: EventKind, value: serde_json::Value) -> Result<Self> {
        let payload = match kind {
            EventKind::AnnotationCreated
            | EventKind::AnnotationUpdated
            | EventKind::AnnotationDeleted => Self::Annotation(serde_json::from_value(value)?),
            EventKind::SessionCreated | EventKind::SessionUpdated | EventKind::SessionClosed => {
                Self::Session(serde_json::from_value(value)?)
            }
            EventKind::ThreadMessage => Self::ThreadMessage(serde_json::from_value(value)?),
        };
        Ok(payload)
    }
}

impl From<Annotation> for EventPayload {
    fn from(a: Annotation) -> Self {
        Self::Annotation(a)
    }
}

impl From<Session> for EventPayload {
    fn from(s: Session) -> Self {
        Self::Session(s)
    }
}

impl From<ThreadMessage> for EventPayload {
    fn from(m: ThreadMessage) -> Self {
        Self::ThreadMessage(m)
    }
}

/// Envelope distributed to subscribers and persisted for replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub sequence: u64,
    pub payload: EventPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    timestamp: DateTime<Utc>,
    session_id: String,
    sequence: u64,
    payload: serde_json::Value,
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawEvent::deserialize(deserializer)?;
        let payload = EventPayload::from_json(raw.kind, raw.payload).map_err(serde::de::Error::custom)?;
        Ok(Self {
            kind: raw.kind,
            timestamp: raw.timestamp,
            session_id: raw.session_id,
            sequence: raw.sequence,
            payload,
        })
    }
}
