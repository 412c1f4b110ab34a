use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How requests are attributed to an owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// One shared store. Optionally protected by a single bearer token.
    #[default]
    SingleUser,
    /// Every request carries a per-user API key; sessions, annotations and
    /// event streams are scoped to the key's owner.
    MultiTenant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_4747")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Environment variable holding the shared bearer token (single-user
    /// mode only). If the env var is set and non-empty, every route except
    /// health/status requires `Authorization: Bearer <token>`.
    /// If unset, the server logs a warning and allows unauthenticated access.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4747,
            host: "127.0.0.1".into(),
            mode: ServerMode::SingleUser,
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
        }
    }
}

impl ServerConfig {
    /// Base URL a local client uses to reach this server.
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. `"*"` admits any origin, `scheme://host:*`
    /// admits any port on that host, anything else must match exactly.
    /// Defaults to `["*"]`: the capture toolbar is embedded in arbitrary
    /// dev pages and the server binds to loopback unless told otherwise.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_4747() -> u16 {
    4747
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["*".into()]
}
fn d_api_token_env() -> String {
    "PINMARK_API_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
