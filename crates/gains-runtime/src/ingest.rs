//! Ingestion Loop.
//!
//! One feed message = one JSON array of orders. Per message:
//! decode → normalize → insert (deduped) → match affected accounts → commit.
//! The offset is committed only after every store effect of the message is
//! durable. Insertion and matching retry independently; exhausting either is
//! fatal and leaves the message uncommitted.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gains_config::ServiceSettings;
use gains_db::LedgerStore;
use gains_portfolio::{match_fifo, normalize_orders, Cents, MatchOutcome};
use gains_schemas::Order;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::feed::FeedConsumer;
use crate::gate::AccountGate;
use crate::metrics::RuntimeMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per store operation, including the first.
    pub attempts: u32,
    /// Sleep before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(s: &ServiceSettings) -> Self {
        Self {
            attempts: s.store_retry_attempts.max(1),
            backoff: s.store_retry_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Per-message failure classification.
#[derive(Debug)]
pub enum IngestError {
    /// Payload is not a JSON array of orders. Skipped and committed.
    Decode(serde_json::Error),
    /// A store operation failed after all retries. Fatal.
    Store(anyhow::Error),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Decode(e) => write!(f, "undecodable feed payload: {e}"),
            IngestError::Store(e) => write!(f, "ledger store failure: {e:#}"),
        }
    }
}

impl std::error::Error for IngestError {}

/// What one matching run did for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRun {
    /// Lots were matched and the outcome persisted.
    Applied { lots: usize, net_change: Cents },
    /// Nothing to consume; no write was made.
    NothingToMatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageReport {
    pub orders: usize,
    pub inserted: usize,
    pub rejects: usize,
    pub runs: Vec<(i64, MatchRun)>,
}

pub struct Ingestor {
    store: Arc<dyn LedgerStore>,
    gate: Arc<AccountGate>,
    retry: RetryPolicy,
    metrics: Arc<RuntimeMetrics>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gate: Arc<AccountGate>,
        retry: RetryPolicy,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            store,
            gate,
            retry,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    /// Process one feed payload. Does not touch the feed.
    pub async fn process_message(&self, payload: &str) -> Result<MessageReport, IngestError> {
        let orders: Vec<Order> = serde_json::from_str(payload).map_err(IngestError::Decode)?;

        let normalized = normalize_orders(&orders);
        for r in &normalized.rejects {
            error!(
                data_quality = true,
                account_id = r.account_id,
                order_id = r.order_id,
                activity_id = ?r.activity_id,
                reason = %r.reason,
                "order rejected by normalizer"
            );
        }
        self.metrics.fills_rejected(normalized.rejects.len());

        let fills = &normalized.fills;
        let inserted = self
            .with_store_retry("insert_fills", || self.store.insert_fills_deduped(fills))
            .await
            .map_err(IngestError::Store)?;

        info!(
            orders = orders.len(),
            fills = fills.len(),
            inserted = inserted.len(),
            "fills stored"
        );
        self.metrics.fills_inserted(inserted.len());

        let mut report = MessageReport {
            orders: orders.len(),
            inserted: inserted.len(),
            rejects: normalized.rejects.len(),
            runs: Vec::new(),
        };
        if inserted.is_empty() {
            return Ok(report);
        }

        // Match only accounts that got a new fill in a batch carrying a SELL.
        let sell_accounts: BTreeSet<i64> = orders
            .iter()
            .filter(|o| o.is_sell())
            .map(|o| o.account_number)
            .collect();
        let accounts: BTreeSet<i64> = inserted
            .iter()
            .map(|k| k.account_id)
            .filter(|a| sell_accounts.contains(a))
            .collect();

        if accounts.is_empty() {
            debug!("no sell in batch; matching skipped");
        }

        for account_id in accounts {
            let run = self
                .with_store_retry("match_account", || self.match_account(account_id))
                .await
                .map_err(IngestError::Store)?;
            report.runs.push((account_id, run));
        }
        Ok(report)
    }

    /// Run the matcher over the account's current unmatched set and persist
    /// the outcome. Used at startup to recover a crash between insert and
    /// match, and by the loop after new fills land.
    pub async fn reconcile_account(&self, account_id: i64) -> Result<MatchRun> {
        self.with_store_retry("reconcile_account", || self.match_account(account_id))
            .await
    }

    async fn match_account(&self, account_id: i64) -> Result<MatchRun> {
        let _guard = self.gate.lock(account_id).await;

        let fills = self
            .store
            .fetch_unmatched_fills(account_id)
            .await
            .context("fetch unmatched fills")?;

        let outcome = match_fifo(account_id, &fills);

        for r in &outcome.rejected {
            error!(
                data_quality = true,
                account_id = r.key.account_id,
                activity_id = r.key.activity_id,
                reason = %r.reason,
                "fill excluded from matching"
            );
        }
        self.metrics.fills_rejected(outcome.rejected.len());

        if outcome.is_empty() {
            debug!(account_id, unmatched = fills.len(), "nothing to match");
            return Ok(MatchRun::NothingToMatch);
        }

        self.store
            .apply_match_outcome(account_id, &outcome)
            .await
            .context("apply match outcome")?;

        self.log_outcome(account_id, &outcome).await;
        self.metrics
            .match_applied(outcome.lots.len(), outcome.net_change.raw());

        Ok(MatchRun::Applied {
            lots: outcome.lots.len(),
            net_change: outcome.net_change,
        })
    }

    async fn log_outcome(&self, account_id: i64, outcome: &MatchOutcome) {
        for lot in &outcome.lots {
            info!(
                account_id,
                symbol = %lot.symbol,
                buy_activity_id = lot.buy.activity_id,
                sell_activity_id = lot.sell.activity_id,
                shares = lot.shares,
                buy_price = %lot.buy_price,
                sell_price = %lot.sell_price,
                term = lot.term.as_str(),
                tax_year = lot.tax_year,
                "lot matched: {}",
                lot.gain
            );
        }

        for (year, change) in &outcome.by_tax_year {
            // Informational only; the write already succeeded.
            match self.store.fetch_balance(account_id, *year).await {
                Ok(Some(b)) => info!(
                    account_id,
                    tax_year = *year,
                    net_change_cents = change.net.raw(),
                    balance_cents = b.net_change.raw(),
                    "net change {} -> balance {}",
                    change.net,
                    b.net_change
                ),
                Ok(None) => {
                    self.metrics.invariant_violated();
                    error!(
                        data_quality = true,
                        invariant = "balance_row_after_upsert",
                        account_id,
                        tax_year = *year,
                        "balance row missing after apply"
                    )
                }
                Err(e) => warn!(account_id, tax_year = *year, error = %format!("{e:#}"), "balance read failed"),
            }
        }
        info!(
            account_id,
            lots = outcome.lots.len(),
            matched = outcome.matched.len(),
            residuals = outcome.residuals.len(),
            net_change_cents = outcome.net_change.raw(),
            "matching run applied: {}",
            outcome.net_change
        );
    }

    async fn with_store_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.retry.attempts => {
                    warn!(op, attempt, error = %format!("{e:#}"), "store operation failed; retrying");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("{op} failed after {attempt} attempt(s)")));
                }
            }
        }
    }
}

/// Drain the feed until it closes or `cancel` fires.
///
/// Cancellation is only observed while waiting for the next message; a
/// message already received is processed and committed first. Returns `Err`
/// on store exhaustion or a failed commit; the caller must treat it as fatal.
pub async fn run_ingest_loop<C>(
    ingestor: &Ingestor,
    consumer: &mut C,
    cancel: CancellationToken,
) -> Result<()>
where
    C: FeedConsumer + ?Sized,
{
    info!("ingest loop started");
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!("ingest loop cancelled");
                break;
            }
            m = consumer.next() => m.context("feed receive failed")?,
        };
        let Some(msg) = next else {
            info!("feed closed; ingest loop exiting");
            break;
        };

        match ingestor.process_message(&msg.payload).await {
            Ok(report) => {
                debug!(offset = msg.offset, inserted = report.inserted, "message processed");
            }
            Err(IngestError::Decode(e)) => {
                error!(
                    data_quality = true,
                    offset = msg.offset,
                    bytes = msg.payload.len(),
                    error = %e,
                    "undecodable feed message skipped"
                );
                ingestor.metrics.decode_failed();
            }
            Err(IngestError::Store(e)) => {
                return Err(e.context(format!(
                    "ledger store failed at offset {}; message left uncommitted",
                    msg.offset
                )));
            }
        }

        consumer
            .commit(msg.offset)
            .await
            .with_context(|| format!("feed commit failed at offset {}", msg.offset))?;
        ingestor.metrics.message_processed();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gains_db::MemoryLedgerStore;

    fn ingestor(store: Arc<MemoryLedgerStore>, attempts: u32) -> Ingestor {
        Ingestor::new(
            store,
            Arc::new(AccountGate::new()),
            RetryPolicy {
                attempts,
                backoff: Duration::from_millis(1),
            },
            Arc::new(RuntimeMetrics::new()),
        )
    }

    #[tokio::test]
    async fn empty_array_inserts_nothing() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ing = ingestor(store.clone(), 1);
        let report = ing.process_message("[]").await.unwrap();
        assert_eq!(report, MessageReport::default());
        assert!(store.all_fills().is_empty());
    }

    #[tokio::test]
    async fn non_array_payload_is_a_decode_error() {
        let ing = ingestor(Arc::new(MemoryLedgerStore::new()), 1);
        let err = ing.process_message("{\"not\":\"orders\"}").await.unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
    }

    #[tokio::test]
    async fn reconcile_with_nothing_unmatched_writes_nothing() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ing = ingestor(store.clone(), 1);
        assert_eq!(ing.reconcile_account(7).await.unwrap(), MatchRun::NothingToMatch);
        assert_eq!(store.apply_calls(), 0);
    }

    #[tokio::test]
    async fn retry_gives_up_after_configured_attempts() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.fail_next_fetches(5);
        let ing = ingestor(store, 2);
        let err = ing.reconcile_account(7).await.unwrap_err();
        assert!(format!("{err:#}").contains("after 2 attempt(s)"));
    }
}
