use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::annotation::Annotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Approved,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Approved => "approved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "approved" => Some(Self::Approved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One browsing/annotation context, usually bound to a single page URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub url: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Owning user. Only set for sessions created through the tenant store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Session {
    pub fn new(url: impl Into<String>, project_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            updated_at: None,
            project_id,
            metadata: None,
            user_id: None,
        }
    }

    /// Host part of the session URL (`localhost:3000` for
    /// `http://localhost:3000/page`). `None` when the URL has no scheme.
    pub fn host(&self) -> Option<&str> {
        let rest = self.url.split_once("://")?.1;
        let host = rest.split(['/', '?', '#']).next()?;
        let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
        (!host.is_empty()).then_some(host)
    }
}

/// A session together with every annotation it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWithAnnotations {
    #[serde(flatten)]
    pub session: Session,
    pub annotations: Vec<Annotation>,
}
