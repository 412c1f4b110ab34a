use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who performed an action: the person in the browser or the automated
/// consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Human,
    Agent,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    #[default]
    Pending,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl AnnotationStatus {
    /// Resolved and dismissed close the feedback loop and carry
    /// resolution metadata.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Fix,
    Change,
    Question,
    Approve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Blocking,
    Important,
    Suggestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One turn in an annotation's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Actor,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ThreadMessage {
    pub fn new(role: Actor, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Annotation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One piece of feedback bound to an element on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub session_id: String,
    /// Percent of viewport width.
    #[serde(default)]
    pub x: f64,
    /// Pixels from the top of the document (or viewport when `is_fixed`).
    #[serde(default)]
    pub y: f64,
    pub comment: String,
    #[serde(default)]
    pub element: String,
    pub element_path: String,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearby_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_classes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearby_elements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_styles: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility: Option<String>,
    #[serde(default)]
    pub is_multi_select: bool,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub react_components: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub status: AnnotationStatus,
    #[serde(default)]
    pub thread: Vec<ThreadMessage>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
}

/// Client-supplied annotation data. Identity, ownership, status and
/// creation time are assigned by the store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnnotation {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub comment: String,
    #[serde(default)]
    pub element: String,
    pub element_path: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub nearby_text: Option<String>,
    #[serde(default)]
    pub css_classes: Option<String>,
    #[serde(default)]
    pub nearby_elements: Option<String>,
    #[serde(default)]
    pub computed_styles: Option<String>,
    #[serde(default)]
    pub full_path: Option<String>,
    #[serde(default)]
    pub accessibility: Option<String>,
    #[serde(default)]
    pub is_multi_select: bool,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub react_components: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub author_id: Option<String>,
}

/// Partial update. Absent fields are left untouched.
///
/// `resolved_at` / `resolved_by` are only honoured together with a
/// terminal `status` in the same patch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationPatch {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub element_path: Option<String>,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub nearby_text: Option<String>,
    #[serde(default)]
    pub css_classes: Option<String>,
    #[serde(default)]
    pub computed_styles: Option<String>,
    #[serde(default)]
    pub accessibility: Option<String>,
    #[serde(default)]
    pub react_components: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub status: Option<AnnotationStatus>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<Actor>,
    #[serde(default)]
    pub thread: Option<Vec<ThreadMessage>>,
    #[serde(default)]
    pub author_id: Option<String>,
}

impl Annotation {
    /// Build a fresh pending annotation owned by `session_id`.
    pub fn create(session_id: &str, data: NewAnnotation) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            x: data.x,
            y: data.y,
            comment: data.comment,
            element: data.element,
            element_path: data.element_path,
            timestamp: data.timestamp,
            selected_text: data.selected_text,
            bounding_box: data.bounding_box,
            nearby_text: data.nearby_text,
            css_classes: data.css_classes,
            nearby_elements: data.nearby_elements,
            computed_styles: data.computed_styles,
            full_path: data.full_path,
            accessibility: data.accessibility,
            is_multi_select: data.is_multi_select,
            is_fixed: data.is_fixed,
            react_components: data.react_components,
            url: data.url,
            intent: data.intent,
            severity: data.severity,
            status: AnnotationStatus::Pending,
            thread: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
            resolved_at: None,
            resolved_by: None,
            author_id: data.author_id,
        }
    }

    /// Move to `status`. Resolution metadata is stamped exactly when the
    /// new status is terminal; the actor defaults to [`Actor::Agent`].
    pub fn set_status(&mut self, status: AnnotationStatus, resolved_by: Option<Actor>, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = Some(now);
        if status.is_terminal() {
            self.resolved_at = Some(now);
            self.resolved_by = Some(resolved_by.unwrap_or(Actor::Agent));
        }
    }

    /// Merge a partial update into this annotation.
    pub fn apply_patch(&mut self, patch: AnnotationPatch, now: DateTime<Utc>) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = patch.$field { self.$field = v; })*
            };
        }
        macro_rules! merge_opt {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = patch.$field { self.$field = Some(v); })*
            };
        }

        merge!(comment, element, element_path, thread);
        merge_opt!(
            selected_text,
            nearby_text,
            css_classes,
            computed_styles,
            accessibility,
            react_components,
            url,
            intent,
            severity,
            author_id,
        );

        if let Some(status) = patch.status {
            self.status = status;
            if status.is_terminal() {
                self.resolved_at = Some(patch.resolved_at.unwrap_or(now));
                self.resolved_by = Some(patch.resolved_by.unwrap_or(Actor::Agent));
            }
        }
        self.updated_at = Some(now);
    }

    /// Append a thread message and return it.
    pub fn push_message(&mut self, role: Actor, content: impl Into<String>) -> ThreadMessage {
        let message = ThreadMessage::new(role, content);
        self.thread.push(message.clone());
        self.updated_at = Some(Utc::now());
        message
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
