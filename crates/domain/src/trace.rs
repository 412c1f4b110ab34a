use serde::Serialize;

/// Structured trace events emitted across all Pinmark crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    BackendSelected {
        backend: String,
        path: Option<String>,
        reason: String,
    },
    SequenceRestored {
        sequence: u64,
    },
    EventsPruned {
        removed: usize,
        retention_days: u32,
    },
    EventEmitted {
        kind: String,
        session_id: String,
        sequence: u64,
        user_id: Option<String>,
        listeners: usize,
    },
    SubscriberFailed {
        kind: String,
        sequence: u64,
        scope: String,
        error: String,
    },
    ApiKeyCreated {
        key_id: String,
        user_id: String,
        key_prefix: String,
    },
    ApiKeyRejected {
        reason: String,
    },
    StoreReset {
        backend: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pm_event");
    }
}
