//! In-memory [`LedgerStore`] with the same conflict and staleness semantics
//! as Postgres. Test-only (`testkit` feature).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use gains_portfolio::{Cents, Fill, FillKey, MatchOutcome, YearChange};

use crate::{BalanceRow, ImportRecord, LedgerStore, StaleSnapshot};

#[derive(Default)]
struct Inner {
    fills: BTreeMap<FillKey, Fill>,
    balances: BTreeMap<(i64, i32), BalanceRow>,
    hashes: BTreeMap<i64, String>,
    imports: BTreeSet<(i64, String)>,
    fail_inserts: u32,
    fail_applies: u32,
    fail_fetches: u32,
    hide_balances: bool,
    apply_calls: u32,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

fn add_year(balances: &mut BTreeMap<(i64, i32), BalanceRow>, account_id: i64, year: i32, c: &YearChange) -> Result<()> {
    let row = balances.entry((account_id, year)).or_insert(BalanceRow {
        account_id,
        tax_year: year,
        net_change: Cents::ZERO,
        short_term: Cents::ZERO,
        long_term: Cents::ZERO,
        carryover_loss: Cents::ZERO,
    });
    let overflow = || anyhow!("balance overflow for account {account_id} year {year}");
    row.net_change = row.net_change.checked_add(c.net).ok_or_else(overflow)?;
    row.short_term = row.short_term.checked_add(c.short_term).ok_or_else(overflow)?;
    row.long_term = row.long_term.checked_add(c.long_term).ok_or_else(overflow)?;
    Ok(())
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the next `n` calls to `insert_fills_deduped` fail before writing.
    pub fn fail_next_inserts(&self, n: u32) {
        self.lock().fail_inserts = n;
    }

    /// Make `fetch_balance` report no row even after a write.
    pub fn hide_balances(&self) {
        self.lock().hide_balances = true;
    }

    /// Make the next `n` calls to `apply_match_outcome` fail before writing.
    pub fn fail_next_applies(&self, n: u32) {
        self.lock().fail_applies = n;
    }

    /// Make the next `n` calls to `fetch_unmatched_fills` fail.
    pub fn fail_next_fetches(&self, n: u32) {
        self.lock().fail_fetches = n;
    }

    /// Number of `apply_match_outcome` calls that reached the store,
    /// including injected failures.
    pub fn apply_calls(&self) -> u32 {
        self.lock().apply_calls
    }

    /// All stored fills (matched or not), in key order.
    pub fn all_fills(&self) -> Vec<Fill> {
        self.lock().fills.values().cloned().collect()
    }

    pub fn fill(&self, key: FillKey) -> Option<Fill> {
        self.lock().fills.get(&key).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_fills_deduped(&self, fills: &[Fill]) -> Result<Vec<FillKey>> {
        let mut g = self.lock();
        if g.fail_inserts > 0 {
            g.fail_inserts -= 1;
            bail!("injected insert failure");
        }
        let mut inserted = Vec::new();
        for f in fills {
            if g.fills.contains_key(&f.key()) {
                continue;
            }
            let mut stored = f.clone();
            stored.open_shares = stored.share_count;
            stored.matched = false;
            g.fills.insert(f.key(), stored);
            inserted.push(f.key());
        }
        Ok(inserted)
    }

    async fn fetch_unmatched_fills(&self, account_id: i64) -> Result<Vec<Fill>> {
        let mut g = self.lock();
        if g.fail_fetches > 0 {
            g.fail_fetches -= 1;
            bail!("injected fetch failure");
        }
        Ok(g.fills
            .values()
            .filter(|f| f.account_id == account_id && !f.matched)
            .cloned()
            .collect())
    }

    async fn apply_match_outcome(&self, account_id: i64, outcome: &MatchOutcome) -> Result<()> {
        let mut g = self.lock();
        g.apply_calls += 1;
        if g.fail_applies > 0 {
            g.fail_applies -= 1;
            bail!("injected apply failure");
        }

        // Validate everything first so a stale snapshot applies nothing.
        for u in outcome.matched.iter().chain(outcome.residuals.iter()) {
            let fresh = g
                .fills
                .get(&u.key)
                .map(|f| !f.matched && f.open_shares == u.expected_open_shares)
                .unwrap_or(false);
            if !fresh {
                return Err(anyhow::Error::new(StaleSnapshot {
                    key: u.key,
                    expected_open_shares: u.expected_open_shares,
                }));
            }
        }

        let mut balances = g.balances.clone();
        for (year, change) in &outcome.by_tax_year {
            add_year(&mut balances, account_id, *year, change)?;
        }

        for u in outcome.matched.iter().chain(outcome.residuals.iter()) {
            if let Some(f) = g.fills.get_mut(&u.key) {
                f.open_shares = u.open_shares;
                f.matched = u.is_matched();
            }
        }
        g.balances = balances;
        Ok(())
    }

    async fn fetch_balance(&self, account_id: i64, tax_year: i32) -> Result<Option<BalanceRow>> {
        let g = self.lock();
        if g.hide_balances {
            return Ok(None);
        }
        Ok(g.balances.get(&(account_id, tax_year)).cloned())
    }

    async fn fetch_balances(&self, account_id: i64) -> Result<Vec<BalanceRow>> {
        Ok(self
            .lock()
            .balances
            .values()
            .filter(|b| b.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn fetch_account_hash(&self, account_id: i64) -> Result<Option<String>> {
        Ok(self.lock().hashes.get(&account_id).cloned())
    }

    async fn save_account_hash(&self, account_id: i64, hash_value: &str) -> Result<()> {
        self.lock().hashes.insert(account_id, hash_value.to_string());
        Ok(())
    }

    async fn record_import(&self, import: &ImportRecord) -> Result<bool> {
        let mut g = self.lock();
        let key = (import.account_id, import.file_sha256.clone());
        if g.imports.contains(&key) {
            return Ok(false);
        }
        let mut balances = g.balances.clone();
        for (year, change) in &import.by_tax_year {
            add_year(&mut balances, import.account_id, *year, change)?;
        }
        g.balances = balances;
        g.imports.insert(key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gains_portfolio::{match_fifo, Side};

    fn fill(activity_id: i64, side: Side, shares: i64, dollars: i64, minute: u32) -> Fill {
        Fill::new(
            1,
            activity_id,
            activity_id,
            "AAPL",
            side,
            shares,
            Cents::new(dollars * 100),
            Utc.with_ymd_and_hms(2024, 2, 1, 15, minute, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn stale_outcome_applies_nothing() {
        let store = MemoryLedgerStore::new();
        store
            .insert_fills_deduped(&[fill(1, Side::Buy, 5, 10, 0), fill(2, Side::Sell, 5, 12, 1)])
            .await
            .unwrap();

        let snapshot = store.fetch_unmatched_fills(1).await.unwrap();
        let outcome = match_fifo(1, &snapshot);

        store.apply_match_outcome(1, &outcome).await.unwrap();
        let err = store.apply_match_outcome(1, &outcome).await.unwrap_err();
        assert!(err.downcast_ref::<StaleSnapshot>().is_some());

        let bal = store.fetch_balance(1, 2024).await.unwrap().unwrap();
        assert_eq!(bal.net_change, Cents::new(1_000));
    }
}
