use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use pm_domain::config::{Config, ConfigSeverity, ServerMode};
use pm_events::EventBus;
use pm_store::Store;

use crate::state::AppState;

/// Validate config, open the store and return a fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Store ────────────────────────────────────────────────────────
    let store = Arc::new(Store::open(&config.store, EventBus::new()).context("opening store")?);
    tracing::info!(
        backend = store.backend_kind().as_str(),
        sequence = store.bus().sequence(),
        "store ready"
    );

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = match config.server.mode {
        ServerMode::SingleUser => {
            let env_var = &config.server.api_token_env;
            let hash = hash_token(std::env::var(env_var).ok().as_deref());
            if hash.is_some() {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
            } else {
                tracing::warn!("API bearer-token auth DISABLED, set the {env_var} env var to enable it");
            }
            hash
        }
        ServerMode::MultiTenant => {
            tracing::info!("multi-tenant mode, requests authenticate with per-user API keys");
            None
        }
    };

    Ok(AppState::new(config, store, api_token_hash))
}

/// Re-run the replay-log retention sweep every `every` for as long as the
/// server lives. The first sweep already happened when the store opened.
pub fn spawn_retention(store: Arc<Store>, retention_days: u32, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            if let Err(e) = store.prune_expired(retention_days) {
                tracing::warn!(error = %e, "event retention sweep failed");
            }
        }
    })
}

/// SHA-256 of a non-empty token.
fn hash_token(token: Option<&str>) -> Option<Vec<u8>> {
    token
        .filter(|t| !t.is_empty())
        .map(|t| Sha256::digest(t.as_bytes()).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_means_dev_mode() {
        assert!(hash_token(None).is_none());
        assert!(hash_token(Some("")).is_none());
        assert_eq!(hash_token(Some("secret")).map(|h| h.len()), Some(32));
    }

    #[test]
    fn opens_the_configured_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = Some(dir.path().join("store.db"));
        let state = build_app_state(Arc::new(config)).unwrap();
        assert_eq!(state.store.backend_kind().as_str(), "sqlite");
        assert!(dir.path().join("store.db").exists());
    }

    #[tokio::test]
    async fn retention_sweep_runs_on_each_tick() {
        use chrono::{Duration as Days, Utc};
        use pm_domain::model::{Event, EventKind, Session};
        use pm_store::backend::MemoryBackend;
        use pm_store::Backend;

        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(Store::new(backend.clone(), EventBus::new()));
        let stale = Event {
            kind: EventKind::SessionUpdated,
            timestamp: Utc::now() - Days::days(30),
            session_id: "s1".into(),
            sequence: 1,
            payload: Session::new("http://localhost", None).into(),
        };
        backend.append_event(&stale, None).unwrap();

        let sweeper = spawn_retention(store, 7, Duration::from_millis(20));
        assert_eq!(backend.max_sequence().unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.max_sequence().unwrap(), 0);
        sweeper.abort();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(build_app_state(Arc::new(config)).is_err());
    }
}
