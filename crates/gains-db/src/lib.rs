//! gains-db
//!
//! The ledger store. Fills are keyed by `(account_id, activity_id)` and are
//! never deleted; balances are keyed by `(account_id, tax_year)` and only
//! move by accumulation.
//!
//! [`LedgerStore`] is the seam the runtime talks to. [`PgLedgerStore`] is the
//! production implementation; `MemoryLedgerStore` (feature `testkit`) mirrors
//! its semantics for tests without a database.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gains_portfolio::{Cents, Fill, FillKey, MatchOutcome, YearChange};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
pub use sqlx::PgPool;

mod pg;

#[cfg(any(test, feature = "testkit"))]
mod memory;

pub use pg::PgLedgerStore;

#[cfg(any(test, feature = "testkit"))]
pub use memory::MemoryLedgerStore;

// ---------------------------------------------------------------------------
// Connection / schema
// ---------------------------------------------------------------------------

/// Connect with the service's pool policy: at most 10 connections, and both
/// pool acquisition and every statement bounded by `request_timeout`.
pub async fn connect(url: &str, request_timeout: Duration) -> Result<PgPool> {
    let opts = PgConnectOptions::from_str(url)
        .context("invalid database url")?
        .options([("statement_timeout", request_timeout.as_millis().to_string())]);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(request_timeout)
        .connect_with(opts)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='fills'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_fills_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_fills_table: bool,
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One `(account, tax_year)` balance row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    pub account_id: i64,
    pub tax_year: i32,
    pub net_change: Cents,
    pub short_term: Cents,
    pub long_term: Cents,
    /// Non-negative; reserved for cross-year loss offset.
    pub carryover_loss: Cents,
}

impl BalanceRow {
    /// Year result with carryover applied: a loss absorbs the carryover, a
    /// gain is reduced by it but never below zero.
    pub fn after_carryover(&self) -> Cents {
        if self.net_change.is_negative() {
            self.net_change + self.carryover_loss
        } else {
            self.net_change - self.net_change.min(self.carryover_loss)
        }
    }
}

/// Lifetime total across every year, carryover applied per year.
pub fn lifetime_total(rows: &[BalanceRow]) -> Cents {
    rows.iter()
        .fold(Cents::ZERO, |acc, r| acc.saturating_add(r.after_carryover()))
}

/// A 1099 realized-gains import, applied once per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub account_id: i64,
    /// Hex SHA-256 of the raw file; the dedupe key.
    pub file_sha256: String,
    pub source: String,
    pub rows_imported: i64,
    pub by_tax_year: BTreeMap<i32, YearChange>,
}

/// A match outcome was computed from a snapshot that no longer holds: a fill
/// it updates is already matched or its open share count moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleSnapshot {
    pub key: FillKey,
    pub expected_open_shares: i64,
}

impl std::fmt::Display for StaleSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stale match snapshot: fill {} no longer unmatched with open_shares={}",
            self.key, self.expected_open_shares
        )
    }
}

impl std::error::Error for StaleSnapshot {}

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert fills; an existing `(account_id, activity_id)` is a no-op.
    /// Returns the keys that were actually inserted.
    async fn insert_fills_deduped(&self, fills: &[Fill]) -> Result<Vec<FillKey>>;

    /// Every fill of the account with `matched = false`.
    async fn fetch_unmatched_fills(&self, account_id: i64) -> Result<Vec<Fill>>;

    /// Persist matched markers, residual open shares and per-year balance
    /// deltas in one transaction. Fails with [`StaleSnapshot`] (and applies
    /// nothing) if any fill moved since the snapshot was read.
    async fn apply_match_outcome(&self, account_id: i64, outcome: &MatchOutcome) -> Result<()>;

    async fn fetch_balance(&self, account_id: i64, tax_year: i32) -> Result<Option<BalanceRow>>;

    /// All years of the account, ascending.
    async fn fetch_balances(&self, account_id: i64) -> Result<Vec<BalanceRow>>;

    async fn fetch_account_hash(&self, account_id: i64) -> Result<Option<String>>;

    async fn save_account_hash(&self, account_id: i64, hash_value: &str) -> Result<()>;

    /// Record the import and upsert-add its balances atomically. Returns
    /// `false` (and changes nothing) if this file was already imported.
    async fn record_import(&self, import: &ImportRecord) -> Result<bool>;
}
