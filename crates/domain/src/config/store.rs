use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Environment toggle that forces the volatile backend when set to `memory`.
pub const STORE_ENV: &str = "PINMARK_STORE";
/// Environment override for [`StoreConfig::event_retention_days`].
pub const RETENTION_ENV: &str = "PINMARK_EVENT_RETENTION_DAYS";

/// Which persistence backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Try SQLite, fall back to memory if it cannot be opened.
    #[default]
    Auto,
    /// SQLite only; still falls back (with a warning) when unavailable.
    Sqlite,
    /// In-memory only. Nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendChoice,
    /// SQLite database file. Defaults to `~/.pinmark/store.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Events older than this are pruned when the backend opens.
    #[serde(default = "d_retention_days")]
    pub event_retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            path: None,
            event_retention_days: d_retention_days(),
        }
    }
}

impl StoreConfig {
    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".pinmark")
                .join("store.db")
        })
    }

    /// Apply `PINMARK_STORE` / `PINMARK_EVENT_RETENTION_DAYS` on top of the
    /// file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(STORE_ENV).ok().as_deref(),
            std::env::var(RETENTION_ENV).ok().as_deref(),
        );
    }

    fn apply_overrides(&mut self, store: Option<&str>, retention: Option<&str>) {
        if store.map(str::trim) == Some("memory") {
            self.backend = BackendChoice::Memory;
        }
        if let Some(days) = retention.and_then(|v| v.trim().parse::<u32>().ok()) {
            self.event_retention_days = days;
        }
    }
}

fn d_retention_days() -> u32 {
    7
}
