//! Poll Loop: the producer side of the feed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gains_broker::{BrokerClient, BrokerError, RefreshTrigger};
use gains_config::ServiceSettings;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::feed::FeedProducer;
use crate::metrics::RuntimeMetrics;

#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Raw JSON array of orders entered in `[from, to]`.
    async fn fetch_orders_raw(
        &self,
        account_hash: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<String, BrokerError>;
}

#[async_trait]
impl OrderSource for BrokerClient {
    async fn fetch_orders_raw(
        &self,
        account_hash: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<String, BrokerError> {
        self.get_orders_raw(account_hash, from, to).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindows {
    pub interval: Duration,
    pub lookback: Duration,
    /// Width of the first window; `None` uses `lookback`.
    pub backfill: Option<Duration>,
}

impl PollWindows {
    pub fn from_settings(s: &ServiceSettings) -> Self {
        let backfill = (s.backfill_days > 0)
            .then(|| Duration::from_secs(u64::from(s.backfill_days) * 86_400));
        Self {
            interval: s.poll_interval,
            lookback: s.lookback,
            backfill,
        }
    }

    fn width(&self, first: bool) -> Duration {
        match (first, self.backfill) {
            (true, Some(b)) => b,
            _ => self.lookback,
        }
    }
}

pub struct PollLoop {
    pub source: Arc<dyn OrderSource>,
    pub producer: Arc<dyn FeedProducer>,
    pub account_hash: String,
    pub windows: PollWindows,
    pub trigger: RefreshTrigger,
    pub metrics: Arc<RuntimeMetrics>,
}

impl PollLoop {
    /// Poll until `cancel` fires. The first poll runs immediately. Returns
    /// `Err` only when the feed can no longer accept messages.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.windows.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.windows.interval.as_secs(),
            lookback_secs = self.windows.lookback.as_secs(),
            "poll loop started"
        );

        let mut first = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let to = Utc::now();
            let width = chrono::Duration::from_std(self.windows.width(first))
                .context("poll window out of range")?;
            let from = to - width;

            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.source.fetch_orders_raw(&self.account_hash, from, to) => r,
            };

            match fetched {
                Ok(body) => {
                    self.metrics.poll(true);
                    first = false;
                    // A full feed must not hold up shutdown.
                    let published = tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("shutdown while feed full; poll result dropped");
                            break;
                        }
                        r = self.producer.publish(body) => r,
                    };
                    let offset = published.context("publish poll result")?;
                    debug!(offset, %from, %to, "orders published");
                }
                Err(e) if e.is_auth() => {
                    self.metrics.poll(false);
                    warn!(error = %e, "orders fetch unauthorized; requesting credential refresh");
                    self.trigger.request();
                }
                Err(e) => {
                    self.metrics.poll(false);
                    warn!(error = %e, "orders fetch failed; retrying next tick");
                }
            }
        }
        info!("poll loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_only_widens_first_window() {
        let w = PollWindows {
            interval: Duration::from_secs(60),
            lookback: Duration::from_secs(300),
            backfill: Some(Duration::from_secs(86_400)),
        };
        assert_eq!(w.width(true), Duration::from_secs(86_400));
        assert_eq!(w.width(false), Duration::from_secs(300));

        let s = ServiceSettings::default();
        let d = PollWindows::from_settings(&s);
        assert_eq!(d.backfill, None);
        assert_eq!(d.width(true), s.lookback);
    }
}
