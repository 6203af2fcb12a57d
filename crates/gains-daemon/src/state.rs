//! Shared state for the gains-daemon HTTP handlers.
//!
//! Handlers receive `State<Arc<AppState>>`. Everything here is read-only from
//! the handlers' point of view; the background tasks own the writes.

use std::sync::Arc;
use std::time::Instant;

use gains_db::LedgerStore;
use gains_runtime::RuntimeMetrics;
use uuid::Uuid;

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "gains-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    /// Fresh per process start; correlates status responses with log lines.
    pub session_id: Uuid,
    pub started_at: Instant,
    /// The single account this process tracks.
    pub account_id: i64,
    pub config_fingerprint: String,
    pub store: Arc<dyn LedgerStore>,
    pub metrics: Arc<RuntimeMetrics>,
}

impl AppState {
    pub fn new(
        account_id: i64,
        config_fingerprint: String,
        store: Arc<dyn LedgerStore>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            build: BuildInfo::default(),
            session_id: Uuid::new_v4(),
            started_at: Instant::now(),
            account_id,
            config_fingerprint,
            store,
            metrics,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
