use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub org_id: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Stored API key record. Holds only the digest of the secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    /// Leading characters of the raw key, kept for display.
    pub key_prefix: String,
    pub key_hash: String,
    pub user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

impl From<&User> for UserContext {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            org_id: user.org_id.clone(),
            email: Some(user.email.clone()),
            role: Some(user.role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(expires_at: Option<DateTime<Utc>>) -> ApiKey {
        ApiKey {
            id: "key_1".into(),
            key_prefix: "sk_live_abcd".into(),
            key_hash: "00".into(),
            user_id: "user_1".into(),
            name: "ci".into(),
            created_at: Utc::now(),
            expires_at,
            last_used_at: None,
        }
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let now = Utc::now();
        assert!(!key(None).is_expired(now));
        assert!(!key(Some(now + Duration::hours(1))).is_expired(now));
        assert!(key(Some(now)).is_expired(now));
    }

    #[test]
    fn user_context_from_user() {
        let user = User {
            id: "user_1".into(),
            email: "dev@example.com".into(),
            org_id: "org_1".into(),
            role: UserRole::Admin,
            created_at: Utc::now(),
            updated_at: None,
        };
        let ctx = UserContext::from(&user);
        assert_eq!(ctx.user_id, "user_1");
        assert_eq!(ctx.org_id, "org_1");
        assert_eq!(ctx.role, Some(UserRole::Admin));
    }
}
