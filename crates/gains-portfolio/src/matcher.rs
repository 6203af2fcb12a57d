//! FIFO tax-lot matcher.
//!
//! Input is the current set of unmatched fills for one account, exactly as
//! read from the ledger store. Output is a [`MatchOutcome`] describing which
//! fills became fully consumed, which were partially consumed (with their
//! new open share count), every matched lot, and the realized change per
//! tax year.
//!
//! # Algorithm
//!
//! 1. Validate each fill; invalid ones are reported in `rejected` and left out.
//! 2. Partition by symbol, sort each partition canonically
//!    (see [`crate::ordering`]).
//! 3. Walk the partition with a queue of open BUY lots, oldest first. A SELL
//!    consumes from the front of the queue until its open shares are gone or
//!    the queue is empty.
//! 4. A fill is marked matched only when its open shares reach zero. Fills
//!    consumed in part are reported as residuals so the remainder is carried
//!    durably into the next run.
//!
//! The matcher is pure and deterministic: the same fill set in any input
//! order produces the same outcome. All money math is integer cents with
//! checked arithmetic. A SELL whose lots would overflow a gain or a running
//! total is rejected on its own; every other fill is still matched.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{Datelike, Duration};

use crate::fixedpoint::Cents;
use crate::ordering::sort_fills_canonical;
use crate::types::{Fill, FillKey, Side, Term};

/// Holding periods strictly longer than this are long-term.
pub const LONG_TERM_THRESHOLD_DAYS: i64 = 365;

// ---------------------------------------------------------------------------
// Rejects
// ---------------------------------------------------------------------------

/// Why a fill was excluded from a matching run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    ForeignAccount { expected: i64 },
    NonPositiveShareCount(i64),
    OpenSharesOutOfRange { open_shares: i64, share_count: i64 },
    NegativePrice(Cents),
    EmptySymbol,
    /// `share_count * price` does not fit in i64 cents.
    NotionalOverflow { share_count: i64, price: Cents },
    /// Closing this SELL would overflow a gain or a running total.
    GainOverflow,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ForeignAccount { expected } => {
                write!(f, "fill belongs to another account (expected {expected})")
            }
            RejectReason::NonPositiveShareCount(n) => write!(f, "share_count must be > 0, got {n}"),
            RejectReason::OpenSharesOutOfRange { open_shares, share_count } => write!(
                f,
                "open_shares must be in 1..={share_count}, got {open_shares}"
            ),
            RejectReason::NegativePrice(p) => write!(f, "price must be >= 0, got {p}"),
            RejectReason::EmptySymbol => write!(f, "symbol is empty"),
            RejectReason::NotionalOverflow { share_count, price } => write!(
                f,
                "notional of {share_count} shares at {price} overflows i64 cents"
            ),
            RejectReason::GainOverflow => write!(f, "realized gain overflows i64 cents"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFill {
    pub key: FillKey,
    pub reason: RejectReason,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// A change to one fill's open share count.
///
/// `expected_open_shares` is the value seen in the input snapshot; storage
/// applies the update only if the row still holds that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillUpdate {
    pub key: FillKey,
    pub expected_open_shares: i64,
    pub open_shares: i64,
}

impl FillUpdate {
    pub fn is_matched(&self) -> bool {
        self.open_shares == 0
    }
}

/// One BUY lot (or part of one) closed by one SELL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotMatch {
    pub symbol: String,
    pub buy: FillKey,
    pub sell: FillKey,
    pub shares: i64,
    pub buy_price: Cents,
    pub sell_price: Cents,
    pub gain: Cents,
    pub term: Term,
    pub tax_year: i32,
}

/// Realized change attributed to one tax year. `net == short_term + long_term`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YearChange {
    pub net: Cents,
    pub short_term: Cents,
    pub long_term: Cents,
}

impl YearChange {
    fn checked_add_lot(self, gain: Cents, term: Term) -> Option<YearChange> {
        let net = self.net.checked_add(gain)?;
        let (short_term, long_term) = match term {
            Term::Short => (self.short_term.checked_add(gain)?, self.long_term),
            Term::Long => (self.short_term, self.long_term.checked_add(gain)?),
        };
        Some(YearChange {
            net,
            short_term,
            long_term,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Fills fully consumed in this run (`open_shares == 0`).
    pub matched: Vec<FillUpdate>,
    /// Fills consumed in part; `open_shares` is the new remainder.
    pub residuals: Vec<FillUpdate>,
    pub lots: Vec<LotMatch>,
    pub net_change: Cents,
    pub by_tax_year: BTreeMap<i32, YearChange>,
    pub rejected: Vec<RejectedFill>,
}

impl MatchOutcome {
    pub fn matched_keys(&self) -> Vec<FillKey> {
        self.matched.iter().map(|u| u.key).collect()
    }

    /// True when the run consumed nothing and there is nothing to persist.
    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

fn validate(account_id: i64, f: &Fill) -> Result<(), RejectReason> {
    if f.account_id != account_id {
        return Err(RejectReason::ForeignAccount {
            expected: account_id,
        });
    }
    if f.share_count <= 0 {
        return Err(RejectReason::NonPositiveShareCount(f.share_count));
    }
    if f.open_shares <= 0 || f.open_shares > f.share_count {
        return Err(RejectReason::OpenSharesOutOfRange {
            open_shares: f.open_shares,
            share_count: f.share_count,
        });
    }
    if f.price_cents.is_negative() {
        return Err(RejectReason::NegativePrice(f.price_cents));
    }
    if f.symbol.trim().is_empty() {
        return Err(RejectReason::EmptySymbol);
    }
    if f.price_cents.checked_mul_qty(f.share_count).is_none() {
        return Err(RejectReason::NotionalOverflow {
            share_count: f.share_count,
            price: f.price_cents,
        });
    }
    Ok(())
}

fn classify(held: Duration) -> Term {
    if held > Duration::days(LONG_TERM_THRESHOLD_DAYS) {
        Term::Long
    } else {
        Term::Short
    }
}

/// An open BUY in the queue. `remaining` shrinks in place on partial consumption.
struct QueuedBuy<'a> {
    fill: &'a Fill,
    remaining: i64,
}

/// Run FIFO matching over `fills` for `account_id`.
///
/// Fills already flagged `matched` are ignored. Invalid fills, and SELLs whose
/// gains overflow, are reported in [`MatchOutcome::rejected`] and do not take
/// part in matching.
pub fn match_fifo(account_id: i64, fills: &[Fill]) -> MatchOutcome {
    let mut out = MatchOutcome::default();

    let mut by_symbol: BTreeMap<&str, Vec<Fill>> = BTreeMap::new();
    for f in fills.iter().filter(|f| !f.matched) {
        match validate(account_id, f) {
            Ok(()) => by_symbol.entry(f.symbol.as_str()).or_default().push(f.clone()),
            Err(reason) => out.rejected.push(RejectedFill { key: f.key(), reason }),
        }
    }

    for (symbol, mut partition) in by_symbol {
        sort_fills_canonical(&mut partition);
        match_partition(symbol, &partition, &mut out);
    }

    out
}

fn match_partition(symbol: &str, fills: &[Fill], out: &mut MatchOutcome) {
    let mut queue: VecDeque<QueuedBuy<'_>> = VecDeque::new();

    for fill in fills {
        match fill.side {
            Side::Buy => queue.push_back(QueuedBuy {
                fill,
                remaining: fill.open_shares,
            }),
            Side::Sell => match price_sell(symbol, fill, &queue, out) {
                Some(pending) => close_sell(fill, pending, &mut queue, out),
                None => out.rejected.push(RejectedFill {
                    key: fill.key(),
                    reason: RejectReason::GainOverflow,
                }),
            },
        }
    }

    for q in queue {
        if q.remaining < q.fill.open_shares {
            out.residuals.push(FillUpdate {
                key: q.fill.key(),
                expected_open_shares: q.fill.open_shares,
                open_shares: q.remaining,
            });
        }
    }
}

/// Lots one SELL would close against the queue, and the totals after them.
struct PendingSell {
    lots: Vec<LotMatch>,
    tax_year: i32,
    year: YearChange,
    net_change: Cents,
    unfilled: i64,
}

/// Price a SELL against the queue without consuming it. `None` on overflow.
fn price_sell(
    symbol: &str,
    sell: &Fill,
    queue: &VecDeque<QueuedBuy<'_>>,
    out: &MatchOutcome,
) -> Option<PendingSell> {
    let tax_year = sell.executed_at.year();
    let mut pending = PendingSell {
        lots: Vec::new(),
        tax_year,
        year: out.by_tax_year.get(&tax_year).copied().unwrap_or_default(),
        net_change: out.net_change,
        unfilled: sell.open_shares,
    };

    for queued in queue {
        if pending.unfilled == 0 {
            break;
        }
        let shares = queued.remaining.min(pending.unfilled);
        let buy = queued.fill;

        let gain = sell
            .price_cents
            .checked_sub(buy.price_cents)?
            .checked_mul_qty(shares)?;
        let term = classify(sell.executed_at - buy.executed_at);
        pending.net_change = pending.net_change.checked_add(gain)?;
        pending.year = pending.year.checked_add_lot(gain, term)?;

        pending.lots.push(LotMatch {
            symbol: symbol.to_string(),
            buy: buy.key(),
            sell: sell.key(),
            shares,
            buy_price: buy.price_cents,
            sell_price: sell.price_cents,
            gain,
            term,
            tax_year,
        });
        pending.unfilled -= shares;
    }

    Some(pending)
}

fn close_sell(
    sell: &Fill,
    pending: PendingSell,
    queue: &mut VecDeque<QueuedBuy<'_>>,
    out: &mut MatchOutcome,
) {
    // Empty queue: the SELL waits untouched for a later BUY.
    if pending.lots.is_empty() {
        return;
    }

    for lot in &pending.lots {
        let Some(front) = queue.front_mut() else {
            break;
        };
        front.remaining -= lot.shares;
        if front.remaining == 0 {
            let buy = front.fill;
            queue.pop_front();
            out.matched.push(FillUpdate {
                key: buy.key(),
                expected_open_shares: buy.open_shares,
                open_shares: 0,
            });
        }
    }

    out.net_change = pending.net_change;
    out.by_tax_year.insert(pending.tax_year, pending.year);
    out.lots.extend(pending.lots);

    if pending.unfilled == 0 {
        out.matched.push(FillUpdate {
            key: sell.key(),
            expected_open_shares: sell.open_shares,
            open_shares: 0,
        });
    } else {
        out.residuals.push(FillUpdate {
            key: sell.key(),
            expected_open_shares: sell.open_shares,
            open_shares: pending.unfilled,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const ACCT: i64 = 11;

    fn fill(activity_id: i64, side: Side, shares: i64, dollars: i64, day: u32) -> Fill {
        Fill::new(
            ACCT,
            activity_id,
            activity_id,
            "AAPL",
            side,
            shares,
            Cents::new(dollars * 100),
            Utc.with_ymd_and_hms(2024, 1, day, 15, 0, 0).unwrap(),
        )
    }

    fn key(activity_id: i64) -> FillKey {
        FillKey {
            account_id: ACCT,
            activity_id,
        }
    }

    #[test]
    fn only_buys_produce_nothing() {
        let out = match_fifo(ACCT, &[fill(1, Side::Buy, 5, 10, 2), fill(2, Side::Buy, 5, 11, 3)]);
        assert!(out.is_empty());
        assert!(out.matched.is_empty());
        assert!(out.residuals.is_empty());
        assert_eq!(out.net_change, Cents::ZERO);
    }

    #[test]
    fn exact_lot_consumption_marks_both_sides() {
        let out = match_fifo(ACCT, &[fill(1, Side::Buy, 5, 10, 2), fill(2, Side::Sell, 5, 8, 3)]);
        assert_eq!(out.matched_keys(), vec![key(1), key(2)]);
        assert!(out.residuals.is_empty());
        assert_eq!(out.net_change, Cents::new(-1_000));
        assert_eq!(out.by_tax_year[&2024].short_term, Cents::new(-1_000));
    }

    #[test]
    fn sell_larger_than_queue_leaves_sell_residual_not_matched() {
        // BUY 3, then SELL 5: buy fully consumed, sell keeps 2 open.
        let out = match_fifo(ACCT, &[fill(1, Side::Buy, 3, 10, 2), fill(2, Side::Sell, 5, 12, 3)]);
        assert_eq!(out.matched_keys(), vec![key(1)]);
        assert_eq!(
            out.residuals,
            vec![FillUpdate {
                key: key(2),
                expected_open_shares: 5,
                open_shares: 2
            }]
        );
        assert_eq!(out.net_change, Cents::new(600));
    }

    #[test]
    fn sell_with_empty_queue_is_untouched() {
        let out = match_fifo(ACCT, &[fill(2, Side::Sell, 5, 12, 3), fill(1, Side::Buy, 3, 10, 4)]);
        assert!(out.is_empty());
        assert!(out.residuals.is_empty());
    }

    #[test]
    fn symbols_are_matched_independently() {
        let mut msft_sell = fill(3, Side::Sell, 5, 50, 4);
        msft_sell.symbol = "MSFT".to_string();
        let out = match_fifo(ACCT, &[fill(1, Side::Buy, 5, 10, 2), msft_sell]);
        assert!(out.is_empty());
    }

    #[test]
    fn holding_period_over_a_year_is_long_term() {
        let buy = Fill::new(
            ACCT,
            1,
            1,
            "AAPL",
            Side::Buy,
            4,
            Cents::new(1_000),
            Utc.with_ymd_and_hms(2022, 6, 1, 15, 0, 0).unwrap(),
        );
        let exactly_365 = Fill::new(
            ACCT,
            2,
            2,
            "AAPL",
            Side::Sell,
            2,
            Cents::new(1_500),
            Utc.with_ymd_and_hms(2023, 6, 1, 15, 0, 0).unwrap(),
        );
        let later = Fill::new(
            ACCT,
            3,
            3,
            "AAPL",
            Side::Sell,
            2,
            Cents::new(2_000),
            Utc.with_ymd_and_hms(2024, 1, 3, 15, 0, 0).unwrap(),
        );
        let out = match_fifo(ACCT, &[buy, exactly_365, later]);
        assert_eq!(out.lots[0].term, Term::Short);
        assert_eq!(out.lots[0].tax_year, 2023);
        assert_eq!(out.lots[1].term, Term::Long);
        assert_eq!(out.lots[1].tax_year, 2024);

        assert_eq!(
            out.by_tax_year[&2023],
            YearChange {
                net: Cents::new(1_000),
                short_term: Cents::new(1_000),
                long_term: Cents::ZERO
            }
        );
        assert_eq!(
            out.by_tax_year[&2024],
            YearChange {
                net: Cents::new(2_000),
                short_term: Cents::ZERO,
                long_term: Cents::new(2_000)
            }
        );
    }

    #[test]
    fn invalid_fills_are_rejected_not_matched() {
        let mut zero = fill(1, Side::Buy, 5, 10, 2);
        zero.share_count = 0;
        let mut foreign = fill(2, Side::Buy, 5, 10, 2);
        foreign.account_id = 99;
        let mut too_open = fill(3, Side::Buy, 5, 10, 2);
        too_open.open_shares = 6;
        let mut neg = fill(4, Side::Buy, 5, 10, 2);
        neg.price_cents = Cents::new(-1);
        let mut blank = fill(5, Side::Buy, 5, 10, 2);
        blank.symbol = " ".to_string();
        let sell = fill(6, Side::Sell, 5, 12, 3);

        let out = match_fifo(ACCT, &[zero, foreign, too_open, neg, blank, sell]);
        assert_eq!(out.rejected.len(), 5);
        assert!(out.is_empty(), "rejected buys must not be consumed");
        assert_eq!(
            out.rejected[1].reason,
            RejectReason::ForeignAccount { expected: ACCT }
        );
    }

    #[test]
    fn already_matched_fills_are_ignored() {
        let mut done = fill(1, Side::Buy, 5, 10, 2);
        done.matched = true;
        let out = match_fifo(ACCT, &[done, fill(2, Side::Sell, 5, 12, 3)]);
        assert!(out.is_empty());
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn oversized_notional_is_rejected_and_other_symbols_still_match() {
        let huge_buy = fill(1, Side::Buy, 10_000_000_000_000, 0, 2);
        let huge_sell = fill(2, Side::Sell, 10_000_000_000_000, 100_000, 3);

        let mut msft_buy = fill(3, Side::Buy, 10, 100, 2);
        msft_buy.symbol = "MSFT".to_string();
        let mut msft_sell = fill(4, Side::Sell, 10, 150, 3);
        msft_sell.symbol = "MSFT".to_string();

        let out = match_fifo(ACCT, &[huge_buy, huge_sell, msft_buy, msft_sell]);
        assert_eq!(
            out.rejected,
            vec![RejectedFill {
                key: key(2),
                reason: RejectReason::NotionalOverflow {
                    share_count: 10_000_000_000_000,
                    price: Cents::new(10_000_000),
                },
            }]
        );
        assert_eq!(out.matched_keys(), vec![key(3), key(4)]);
        assert_eq!(out.net_change, Cents::new(50_000));
    }

    #[test]
    fn gain_overflow_rejects_only_that_sell() {
        let max = Cents::new(i64::MAX);
        let mut first_buy = fill(1, Side::Buy, 1, 0, 2);
        first_buy.price_cents = max;
        let first_sell = fill(2, Side::Sell, 1, 0, 3);
        let mut second_buy = fill(3, Side::Buy, 1, 0, 4);
        second_buy.price_cents = max;
        let second_sell = fill(4, Side::Sell, 1, 0, 5);

        let mut msft_buy = fill(5, Side::Buy, 10, 100, 2);
        msft_buy.symbol = "MSFT".to_string();
        let mut msft_sell = fill(6, Side::Sell, 10, 150, 3);
        msft_sell.symbol = "MSFT".to_string();

        let out = match_fifo(
            ACCT,
            &[first_buy, first_sell, second_buy, second_sell, msft_buy, msft_sell],
        );

        assert_eq!(
            out.rejected,
            vec![RejectedFill {
                key: key(4),
                reason: RejectReason::GainOverflow,
            }]
        );
        // The rejected SELL consumed nothing; its BUY stays open.
        assert_eq!(out.matched_keys(), vec![key(1), key(2), key(5), key(6)]);
        assert!(out.residuals.is_empty());
        assert_eq!(out.net_change, Cents::new(-i64::MAX + 50_000));
        assert_eq!(out.by_tax_year[&2024].net, out.net_change);
    }
}
