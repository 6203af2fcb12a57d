use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gains_portfolio::{Cents, Fill, FillKey, FillUpdate, MatchOutcome, Side, YearChange};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{BalanceRow, ImportRecord, LedgerStore, StaleSnapshot};

/// Postgres-backed [`LedgerStore`].
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn fill_from_row(row: &PgRow) -> Result<Fill> {
    let side_raw: String = row.try_get("side")?;
    let side = Side::parse(&side_raw).ok_or_else(|| anyhow!("invalid fills.side in db: {side_raw}"))?;
    let executed_at: DateTime<Utc> = row.try_get("executed_at")?;

    Ok(Fill {
        account_id: row.try_get("account_id")?,
        activity_id: row.try_get("activity_id")?,
        order_id: row.try_get("order_id")?,
        symbol: row.try_get("symbol")?,
        side,
        share_count: row.try_get("share_count")?,
        open_shares: row.try_get("open_shares")?,
        price_cents: Cents::new(row.try_get("price_cents")?),
        executed_at,
        matched: row.try_get("matched")?,
    })
}

fn balance_from_row(row: &PgRow) -> Result<BalanceRow> {
    Ok(BalanceRow {
        account_id: row.try_get("account_id")?,
        tax_year: row.try_get("tax_year")?,
        net_change: Cents::new(row.try_get("net_change_cents")?),
        short_term: Cents::new(row.try_get("short_term_cents")?),
        long_term: Cents::new(row.try_get("long_term_cents")?),
        carryover_loss: Cents::new(row.try_get("carryover_loss_cents")?),
    })
}

/// Conditional update of one fill. Zero affected rows means the snapshot the
/// outcome was computed from is stale.
async fn apply_fill_update(tx: &mut Transaction<'_, Postgres>, u: &FillUpdate) -> Result<()> {
    let res = sqlx::query(
        r#"
        update fills
        set open_shares = $3,
            matched = $4
        where account_id = $1
          and activity_id = $2
          and not matched
          and open_shares = $5
        "#,
    )
    .bind(u.key.account_id)
    .bind(u.key.activity_id)
    .bind(u.open_shares)
    .bind(u.is_matched())
    .bind(u.expected_open_shares)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("update fill {} failed", u.key))?;

    if res.rows_affected() != 1 {
        return Err(anyhow::Error::new(StaleSnapshot {
            key: u.key,
            expected_open_shares: u.expected_open_shares,
        }));
    }
    Ok(())
}

async fn upsert_add_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    tax_year: i32,
    change: &YearChange,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into balances (
          account_id, tax_year, net_change_cents, short_term_cents, long_term_cents
        ) values ($1, $2, $3, $4, $5)
        on conflict (account_id, tax_year) do update set
          net_change_cents = balances.net_change_cents + excluded.net_change_cents,
          short_term_cents = balances.short_term_cents + excluded.short_term_cents,
          long_term_cents  = balances.long_term_cents + excluded.long_term_cents,
          updated_at = now()
        "#,
    )
    .bind(account_id)
    .bind(tax_year)
    .bind(change.net.raw())
    .bind(change.short_term.raw())
    .bind(change.long_term.raw())
    .execute(&mut **tx)
    .await
    .with_context(|| format!("balance upsert failed for account {account_id} year {tax_year}"))?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_fills_deduped(&self, fills: &[Fill]) -> Result<Vec<FillKey>> {
        let mut tx = self.pool.begin().await.context("begin insert tx failed")?;
        let mut inserted = Vec::new();

        for f in fills {
            // `returning` yields a row only when the insert happened.
            let row: Option<(i64,)> = sqlx::query_as(
                r#"
                insert into fills (
                  account_id, activity_id, order_id, symbol, side,
                  share_count, open_shares, price_cents, executed_at, matched
                ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, false)
                on conflict (account_id, activity_id) do nothing
                returning activity_id
                "#,
            )
            .bind(f.account_id)
            .bind(f.activity_id)
            .bind(f.order_id)
            .bind(&f.symbol)
            .bind(f.side.as_str())
            .bind(f.share_count)
            .bind(f.share_count)
            .bind(f.price_cents.raw())
            .bind(f.executed_at)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("insert fill {} failed", f.key()))?;

            if row.is_some() {
                inserted.push(f.key());
            }
        }

        tx.commit().await.context("commit insert tx failed")?;
        Ok(inserted)
    }

    async fn fetch_unmatched_fills(&self, account_id: i64) -> Result<Vec<Fill>> {
        let rows = sqlx::query(
            r#"
            select account_id, activity_id, order_id, symbol, side,
                   share_count, open_shares, price_cents, executed_at, matched
            from fills
            where account_id = $1
              and not matched
            order by symbol asc, executed_at asc, activity_id asc
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .context("fetch_unmatched_fills failed")?;

        rows.iter().map(fill_from_row).collect()
    }

    async fn apply_match_outcome(&self, account_id: i64, outcome: &MatchOutcome) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin match tx failed")?;

        for u in outcome.matched.iter().chain(outcome.residuals.iter()) {
            // Dropping `tx` on error rolls everything back.
            apply_fill_update(&mut tx, u).await?;
        }
        for (year, change) in &outcome.by_tax_year {
            upsert_add_balance(&mut tx, account_id, *year, change).await?;
        }

        tx.commit().await.context("commit match tx failed")?;
        Ok(())
    }

    async fn fetch_balance(&self, account_id: i64, tax_year: i32) -> Result<Option<BalanceRow>> {
        let row = sqlx::query(
            r#"
            select account_id, tax_year, net_change_cents, short_term_cents,
                   long_term_cents, carryover_loss_cents
            from balances
            where account_id = $1 and tax_year = $2
            "#,
        )
        .bind(account_id)
        .bind(tax_year)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_balance failed")?;

        row.as_ref().map(balance_from_row).transpose()
    }

    async fn fetch_balances(&self, account_id: i64) -> Result<Vec<BalanceRow>> {
        let rows = sqlx::query(
            r#"
            select account_id, tax_year, net_change_cents, short_term_cents,
                   long_term_cents, carryover_loss_cents
            from balances
            where account_id = $1
            order by tax_year asc
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .context("fetch_balances failed")?;

        rows.iter().map(balance_from_row).collect()
    }

    async fn fetch_account_hash(&self, account_id: i64) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("select hash_value from account_hash where account_id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
                .context("fetch_account_hash failed")?;
        Ok(row.map(|(h,)| h))
    }

    async fn save_account_hash(&self, account_id: i64, hash_value: &str) -> Result<()> {
        sqlx::query(
            r#"
            insert into account_hash (account_id, hash_value)
            values ($1, $2)
            on conflict (account_id) do update set
              hash_value = excluded.hash_value,
              updated_at = now()
            where account_hash.hash_value <> excluded.hash_value
            "#,
        )
        .bind(account_id)
        .bind(hash_value)
        .execute(&self.pool)
        .await
        .context("save_account_hash failed")?;
        Ok(())
    }

    async fn record_import(&self, import: &ImportRecord) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("begin import tx failed")?;

        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            insert into imports (import_id, account_id, file_sha256, source, rows_imported)
            values ($1, $2, $3, $4, $5)
            on conflict (account_id, file_sha256) do nothing
            returning import_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(import.account_id)
        .bind(&import.file_sha256)
        .bind(&import.source)
        .bind(import.rows_imported)
        .fetch_optional(&mut *tx)
        .await
        .context("insert imports row failed")?;

        if row.is_none() {
            tx.rollback().await.context("rollback import tx failed")?;
            return Ok(false);
        }

        for (year, change) in &import.by_tax_year {
            upsert_add_balance(&mut tx, import.account_id, *year, change).await?;
        }

        tx.commit().await.context("commit import tx failed")?;
        Ok(true)
    }
}
