//! HTTP client side of the gateway: what the agent commands (`sessions`,
//! `pending`, `ack`, `resolve`, `dismiss`, `reply`), `watch` and
//! `serve --mcp-only` use to talk to a running server.
//!
//! The watcher reads the SSE feed, prints each envelope as one JSON line
//! and reconnects with `Last-Event-ID` so nothing is missed across a
//! server restart.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use pm_domain::config::Config;
use pm_domain::model::{Actor, Annotation, AnnotationStatus, Session, SessionWithAnnotations};

/// Environment variable holding a per-user `sk_live_` key for
/// multi-tenant servers. Takes precedence over the shared token.
pub const API_KEY_ENV: &str = "PINMARK_API_KEY";

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Statuses that retrying cannot fix.
const FATAL_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_REQUEST,
    StatusCode::UNAUTHORIZED,
    StatusCode::NOT_FOUND,
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE framing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Pull complete frames out of a raw SSE byte buffer.
///
/// Frames are delimited by `\n\n` and decoded only once complete, so a
/// multi-byte character split across network chunks survives. Comment
/// lines (`: ping`) and frames without data are skipped. Any trailing
/// partial frame stays in the buffer for the next call.
pub fn drain_frames(buffer: &mut Vec<u8>) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let block: Vec<u8> = buffer.drain(..pos + 2).collect();
        if let Some(frame) = parse_frame(&String::from_utf8_lossy(&block[..pos])) {
            frames.push(frame);
        }
    }

    frames
}

fn parse_frame(block: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => frame.event = Some(value.to_owned()),
            "id" => frame.id = Some(value.to_owned()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if data.is_empty() {
        return None;
    }
    frame.data = data.join("\n");
    Some(frame)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which stream to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Session(String),
    Domain(String),
    All,
}

impl WatchTarget {
    pub fn new(session: Option<String>, domain: Option<String>) -> Self {
        match (session, domain) {
            (Some(id), _) => Self::Session(id),
            (None, Some(domain)) => Self::Domain(domain),
            (None, None) => Self::All,
        }
    }

    fn path(&self) -> String {
        match self {
            Self::Session(id) => format!("/sessions/{id}/events"),
            Self::Domain(_) | Self::All => "/events".into(),
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("agent", "true".to_owned())];
        if let Self::Domain(domain) = self {
            query.push(("domain", domain.clone()));
        }
        query
    }
}

/// Body of `GET /pending` and `GET /sessions/:id/pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAnnotations {
    pub count: usize,
    pub annotations: Vec<Annotation>,
}

pub struct Bridge {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Bridge {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    /// `PINMARK_API_KEY`, else the shared token env var from config.
    pub fn token_from_env(config: &Config) -> Option<String> {
        [API_KEY_ENV, config.server.api_token_env.as_str()]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|t| !t.is_empty())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send `request` and decode a JSON success body. 404 becomes
    /// "`what` not found".
    async fn fetch<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> anyhow::Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.base_url))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            anyhow::bail!("{what} not found");
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{what}: server answered {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("decoding {what}"))
    }

    // ── reads ───────────────────────────────────────────────────────

    pub async fn list_sessions(&self) -> anyhow::Result<Vec<Session>> {
        self.fetch(self.request(Method::GET, "/sessions"), "sessions")
            .await
    }

    pub async fn session(&self, id: &str) -> anyhow::Result<SessionWithAnnotations> {
        self.fetch(
            self.request(Method::GET, &format!("/sessions/{id}")),
            &format!("session {id}"),
        )
        .await
    }

    /// Pending annotations of one session, or of every session.
    pub async fn pending(&self, session: Option<&str>) -> anyhow::Result<PendingAnnotations> {
        let (path, what) = match session {
            Some(id) => (format!("/sessions/{id}/pending"), format!("session {id}")),
            None => ("/pending".to_owned(), "pending annotations".to_owned()),
        };
        self.fetch(self.request(Method::GET, &path), &what).await
    }

    // ── agent actions ───────────────────────────────────────────────

    /// Tell the human the feedback was seen.
    pub async fn acknowledge(&self, annotation_id: &str) -> anyhow::Result<Annotation> {
        self.set_status(annotation_id, AnnotationStatus::Acknowledged)
            .await
    }

    /// Resolve, then post `Resolved: <summary>` to the thread when a
    /// summary is given.
    pub async fn resolve(
        &self,
        annotation_id: &str,
        summary: Option<&str>,
    ) -> anyhow::Result<Annotation> {
        let resolved = self
            .set_status(annotation_id, AnnotationStatus::Resolved)
            .await?;
        match summary.map(str::trim).filter(|s| !s.is_empty()) {
            Some(summary) => {
                self.reply(annotation_id, &format!("Resolved: {summary}"))
                    .await
            }
            None => Ok(resolved),
        }
    }

    /// Dismiss and record why in the thread.
    pub async fn dismiss(&self, annotation_id: &str, reason: &str) -> anyhow::Result<Annotation> {
        let reason = reason.trim();
        if reason.is_empty() {
            anyhow::bail!("a reason is required to dismiss an annotation");
        }
        self.set_status(annotation_id, AnnotationStatus::Dismissed)
            .await?;
        self.reply(annotation_id, &format!("Dismissed: {reason}"))
            .await
    }

    /// Append an agent message to the annotation's thread.
    pub async fn reply(&self, annotation_id: &str, message: &str) -> anyhow::Result<Annotation> {
        let request = self
            .request(Method::POST, &format!("/annotations/{annotation_id}/thread"))
            .json(&json!({ "role": Actor::Agent, "content": message }));
        self.fetch(request, &format!("annotation {annotation_id}"))
            .await
    }

    async fn set_status(
        &self,
        annotation_id: &str,
        status: AnnotationStatus,
    ) -> anyhow::Result<Annotation> {
        let request = self
            .request(Method::PATCH, &format!("/annotations/{annotation_id}/status"))
            .json(&json!({ "status": status, "resolvedBy": Actor::Agent }));
        self.fetch(request, &format!("annotation {annotation_id}"))
            .await
    }

    // ── event stream ────────────────────────────────────────────────

    /// Follow `target` until the server rejects us, handing every event
    /// envelope to `on_event`. Transient failures reconnect with backoff.
    pub async fn watch<F>(&self, target: &WatchTarget, mut on_event: F) -> anyhow::Result<()>
    where
        F: FnMut(&str),
    {
        let mut last_id: Option<String> = None;
        let mut backoff = Duration::from_secs(1);

        loop {
            match self.stream_once(target, &mut last_id, &mut on_event).await {
                Ok(()) => {
                    tracing::info!("event stream closed by server, reconnecting");
                    backoff = Duration::from_secs(1);
                }
                Err(StreamError::Fatal(e)) => return Err(e),
                Err(StreamError::Transient(e)) => {
                    tracing::warn!(error = %e, retry_in = ?backoff, "event stream interrupted");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn stream_once<F>(
        &self,
        target: &WatchTarget,
        last_id: &mut Option<String>,
        on_event: &mut F,
    ) -> Result<(), StreamError>
    where
        F: FnMut(&str),
    {
        let mut request = self
            .request(Method::GET, &target.path())
            .query(&target.query());
        if let Some(id) = last_id.as_deref() {
            request = request.header("Last-Event-ID", id);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| StreamError::Transient(e.into()))?;
        let status = response.status();
        if FATAL_STATUSES.contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Fatal(anyhow::anyhow!(
                "{} rejected the stream ({status}): {body}",
                self.base_url
            )));
        }
        if !status.is_success() {
            return Err(StreamError::Transient(anyhow::anyhow!(
                "unexpected status {status}"
            )));
        }
        tracing::debug!(watch = ?target, "event stream connected");

        let mut buffer = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| StreamError::Transient(e.into()))?
        {
            buffer.extend_from_slice(&chunk);
            for frame in drain_frames(&mut buffer) {
                if frame.event.as_deref() == Some("warning") {
                    tracing::warn!(detail = %frame.data, "server dropped events, will replay on reconnect");
                    continue;
                }
                if frame.id.is_some() {
                    *last_id = frame.id.clone();
                }
                on_event(&frame.data);
            }
        }
        Ok(())
    }
}

enum StreamError {
    Fatal(anyhow::Error),
    Transient(anyhow::Error),
}
