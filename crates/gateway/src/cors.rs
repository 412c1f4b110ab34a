//! Cross-origin policy for the capture toolbar.
//!
//! The toolbar runs inside whatever page is being reviewed, so the
//! allowed origins come straight from `server.cors.allowed_origins`.
//! Authentication travels in the `Authorization` header, never cookies,
//! so the layer never allows credentials.

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use pm_domain::config::CorsConfig;

const METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    Any,
    Exact(String),
    /// `scheme://host:` followed by any run of digits.
    AnyPort(String),
}

impl OriginRule {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Some(Self::Any);
        }
        if let Some(prefix) = raw.strip_suffix('*') {
            return prefix
                .ends_with(':')
                .then(|| Self::AnyPort(prefix.to_owned()));
        }
        HeaderValue::from_str(raw).ok()?;
        Some(Self::Exact(raw.to_owned()))
    }

    fn admits(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == origin,
            Self::AnyPort(prefix) => origin
                .strip_prefix(prefix.as_str())
                .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
        }
    }
}

fn rules(cors: &CorsConfig) -> Vec<OriginRule> {
    cors.allowed_origins
        .iter()
        .filter_map(|raw| {
            let rule = OriginRule::parse(raw);
            if rule.is_none() {
                tracing::warn!(origin = %raw, "ignoring unusable CORS origin");
            }
            rule
        })
        .collect()
}

pub fn layer(cors: &CorsConfig) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(METHODS).allow_headers([
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        HeaderName::from_static("last-event-id"),
    ]);

    let rules = rules(cors);
    if rules.contains(&OriginRule::Any) {
        return base.allow_origin(Any);
    }
    tracing::info!(origins = rules.len(), "CORS restricted to configured origins");
    base.allow_origin(AllowOrigin::predicate(move |origin, _| {
        origin
            .to_str()
            .is_ok_and(|origin| rules.iter().any(|rule| rule.admits(origin)))
    }))
}
