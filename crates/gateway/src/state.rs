use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pm_domain::config::Config;
use pm_store::{Store, TenantStore};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    /// Owner-scoped view over `store`; used in multi-tenant mode.
    pub tenants: Arc<TenantStore>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the shared bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced in single-user mode).
    pub api_token_hash: Option<Vec<u8>>,

    // ── Stream bookkeeping ────────────────────────────────────────────
    pub listeners: Arc<ListenerCounts>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<Store>, api_token_hash: Option<Vec<u8>>) -> Self {
        let tenants = Arc::new(TenantStore::new(store.clone()));
        Self {
            config,
            store,
            tenants,
            api_token_hash,
            listeners: Arc::new(ListenerCounts::default()),
            started_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listener counts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Open SSE connections. Agents identify themselves with `?agent=true`
/// so delivery status can tell a watching agent from a browser toolbar.
#[derive(Debug, Default)]
pub struct ListenerCounts {
    active: AtomicUsize,
    agents: AtomicUsize,
}

impl ListenerCounts {
    /// Count a connection until the returned guard is dropped.
    pub fn track(self: &Arc<Self>, agent: bool) -> ListenerGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        if agent {
            self.agents.fetch_add(1, Ordering::Relaxed);
        }
        ListenerGuard {
            counts: self.clone(),
            agent,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn agents(&self) -> usize {
        self.agents.load(Ordering::Relaxed)
    }
}

pub struct ListenerGuard {
    counts: Arc<ListenerCounts>,
    agent: bool,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.counts.active.fetch_sub(1, Ordering::Relaxed);
        if self.agent {
            self.counts.agents.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_release_their_counts() {
        let counts = Arc::new(ListenerCounts::default());
        let browser = counts.track(false);
        let agent = counts.track(true);
        assert_eq!(counts.active(), 2);
        assert_eq!(counts.agents(), 1);

        drop(agent);
        assert_eq!(counts.active(), 1);
        assert_eq!(counts.agents(), 0);

        drop(browser);
        assert_eq!(counts.active(), 0);
    }
}
