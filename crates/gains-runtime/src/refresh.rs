//! Credential Refresh Loop.
//!
//! Scheduled every `interval` and on demand through [`RefreshTrigger`]. A
//! failed refresh keeps the current pair and never ends the loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use gains_broker::{BrokerError, CredentialCell, RefreshTrigger, TokenClient, TokenPair};
use gains_config::ConfigStore;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::RuntimeMetrics;

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, current_refresh: &str) -> Result<TokenPair, BrokerError>;
}

#[async_trait]
impl TokenRefresher for TokenClient {
    async fn refresh(&self, current_refresh: &str) -> Result<TokenPair, BrokerError> {
        TokenClient::refresh(self, current_refresh).await
    }
}

/// Durable home of the token pair.
pub trait TokenSink: Send + Sync {
    fn persist(&self, pair: &TokenPair) -> Result<()>;
}

impl TokenSink for ConfigStore {
    fn persist(&self, pair: &TokenPair) -> Result<()> {
        self.update_tokens(&pair.bearer, &pair.refresh)
    }
}

/// One refresh: request, publish, persist.
///
/// The new pair is published before it is persisted; a persist failure is
/// logged and does not fail the refresh.
pub async fn refresh_once(
    refresher: &dyn TokenRefresher,
    sink: &dyn TokenSink,
    cell: &CredentialCell,
) -> Result<(), BrokerError> {
    let current = cell.current();
    let next = refresher.refresh(&current.refresh).await?;
    cell.publish(next.clone());
    if let Err(e) = sink.persist(&next) {
        error!(error = %format!("{e:#}"), "refreshed tokens could not be persisted; in-memory pair is current");
    }
    Ok(())
}

pub struct RefreshLoop {
    pub refresher: Arc<dyn TokenRefresher>,
    pub sink: Arc<dyn TokenSink>,
    pub cell: CredentialCell,
    pub trigger: RefreshTrigger,
    pub interval: Duration,
    pub metrics: Arc<RuntimeMetrics>,
}

impl RefreshLoop {
    /// Run until `cancel` fires. The first scheduled refresh happens one
    /// `interval` after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "refresh loop started");

        loop {
            let reason: &'static str = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => "scheduled",
                _ = self.trigger.requested() => "on_demand",
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                r = refresh_once(self.refresher.as_ref(), self.sink.as_ref(), &self.cell) => r,
            };

            match result {
                Ok(()) => {
                    info!(reason, "credential refresh succeeded");
                    self.metrics.refresh(true, reason);
                }
                Err(e) => {
                    warn!(reason, error = %e, "credential refresh failed; keeping current credentials");
                    self.metrics.refresh(false, reason);
                }
            }

            if reason == "on_demand" {
                ticker.reset();
            }
        }
        info!("refresh loop stopped");
    }
}
