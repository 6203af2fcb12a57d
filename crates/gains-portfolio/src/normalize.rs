//! Order → fill normalization.
//!
//! Converts decoded brokerage orders (`gains_schemas::Order`) into flat
//! [`Fill`] records: integer shares, integer cents, UTC timestamps.
//!
//! Filtering rules:
//! - only `status == FILLED` orders produce fills;
//! - orders whose primary leg is an `OPTION` produce no fills;
//! - one fill per execution activity, priced and timed by the activity's
//!   first execution leg.
//!
//! Orders that fail the filter are silently skipped. Orders that pass the
//! filter but carry malformed data produce a [`NormalizeReject`] per bad
//! activity instead of a fill, so the caller can log them as data-quality
//! events without dropping the rest of the batch.
//!
//! This module does not touch storage and has no clock.

use std::fmt;

use chrono::{DateTime, Utc};
use gains_schemas::{Order, LEG_TYPE_OPTION, STATUS_FILLED};

use crate::fixedpoint::{Cents, CentsError};
use crate::types::{Fill, Side};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an eligible order (or one of its activities) yielded no fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// Filled order with an empty `orderLegCollection`.
    NoLegs,
    /// Instruction other than BUY / SELL (e.g. `SELL_SHORT`).
    UnsupportedInstruction(String),
    /// Primary leg has no instrument symbol.
    EmptySymbol,
    /// Activity has no execution legs to take price/time from.
    NoExecutionLegs,
    /// Execution leg time is not RFC 3339 or `+0000` offset form.
    InvalidTime(String),
    /// Execution price is NaN/infinite or out of range.
    InvalidPrice(CentsError),
    /// Execution price below zero.
    NegativePrice(Cents),
    /// Activity quantity truncates to zero or less.
    NonPositiveShares(i64),
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::NoLegs => write!(f, "filled order has no legs"),
            NormalizeError::UnsupportedInstruction(raw) => {
                write!(f, "unsupported instruction '{raw}'")
            }
            NormalizeError::EmptySymbol => write!(f, "instrument symbol is empty"),
            NormalizeError::NoExecutionLegs => write!(f, "activity has no execution legs"),
            NormalizeError::InvalidTime(raw) => write!(f, "execution time unparseable: '{raw}'"),
            NormalizeError::InvalidPrice(e) => write!(f, "execution price invalid: {e}"),
            NormalizeError::NegativePrice(p) => write!(f, "execution price negative: {p}"),
            NormalizeError::NonPositiveShares(n) => {
                write!(f, "share count must be > 0 after truncation, got {n}")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// A rejected order or activity, with enough identity to find it upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeReject {
    pub account_id: i64,
    pub order_id: i64,
    /// `None` when the whole order was rejected before activities were read.
    pub activity_id: Option<i64>,
    pub reason: NormalizeError,
}

/// Result of normalizing one or more orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub fills: Vec<Fill>,
    pub rejects: Vec<NormalizeReject>,
}

impl Normalized {
    fn extend(&mut self, other: Normalized) {
        self.fills.extend(other.fills);
        self.rejects.extend(other.rejects);
    }
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

/// Parse an execution timestamp. Accepts RFC 3339 (`2024-03-04T14:30:00Z`,
/// `...+00:00`) and the brokerage's colon-less offset (`...+0000`), with or
/// without fractional seconds.
pub fn parse_execution_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a single order.
pub fn normalize_order(order: &Order) -> Normalized {
    let mut out = Normalized::default();

    if order.status != STATUS_FILLED {
        return out;
    }

    let reject = |activity_id: Option<i64>, reason: NormalizeError| NormalizeReject {
        account_id: order.account_number,
        order_id: order.order_id,
        activity_id,
        reason,
    };

    let Some(leg) = order.primary_leg() else {
        out.rejects.push(reject(None, NormalizeError::NoLegs));
        return out;
    };
    if leg.order_leg_type == LEG_TYPE_OPTION {
        return out;
    }
    let Some(side) = Side::parse(&leg.instruction) else {
        out.rejects.push(reject(
            None,
            NormalizeError::UnsupportedInstruction(leg.instruction.clone()),
        ));
        return out;
    };
    let symbol = leg.instrument.symbol.trim();
    if symbol.is_empty() {
        out.rejects.push(reject(None, NormalizeError::EmptySymbol));
        return out;
    }

    for activity in &order.order_activity_collection {
        let id = Some(activity.activity_id);

        let Some(exec) = activity.execution_legs.first() else {
            out.rejects.push(reject(id, NormalizeError::NoExecutionLegs));
            continue;
        };

        // Fractional shares are truncated; NaN truncates to 0 and is rejected below.
        let shares = activity.quantity.trunc() as i64;
        if shares <= 0 {
            out.rejects.push(reject(id, NormalizeError::NonPositiveShares(shares)));
            continue;
        }

        let price = match Cents::from_dollars_f64(exec.price) {
            Ok(p) if p.is_negative() => {
                out.rejects.push(reject(id, NormalizeError::NegativePrice(p)));
                continue;
            }
            Ok(p) => p,
            Err(e) => {
                out.rejects.push(reject(id, NormalizeError::InvalidPrice(e)));
                continue;
            }
        };

        let Some(executed_at) = parse_execution_time(&exec.time) else {
            out.rejects
                .push(reject(id, NormalizeError::InvalidTime(exec.time.clone())));
            continue;
        };

        out.fills.push(Fill::new(
            order.account_number,
            activity.activity_id,
            order.order_id,
            symbol,
            side,
            shares,
            price,
            executed_at,
        ));
    }

    out
}

/// Normalize every order of a batch, preserving batch order.
pub fn normalize_orders(orders: &[Order]) -> Normalized {
    let mut out = Normalized::default();
    for order in orders {
        out.extend(normalize_order(order));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gains_schemas::{ExecutionLeg, Instrument, OrderActivity, OrderLeg};

    fn order(status: &str, leg_type: &str, instruction: &str, activities: Vec<OrderActivity>) -> Order {
        Order {
            order_id: 42,
            account_number: 7,
            status: status.to_string(),
            order_leg_collection: vec![OrderLeg {
                order_leg_type: leg_type.to_string(),
                instruction: instruction.to_string(),
                instrument: Instrument {
                    symbol: "MSFT".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            order_activity_collection: activities,
            ..Default::default()
        }
    }

    fn activity(id: i64, qty: f64, price: f64, time: &str) -> OrderActivity {
        OrderActivity {
            activity_id: id,
            quantity: qty,
            execution_legs: vec![ExecutionLeg {
                price,
                time: time.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn filled_equity_order_yields_one_fill_per_activity() {
        let o = order(
            "FILLED",
            "EQUITY",
            "SELL",
            vec![
                activity(1, 3.0, 410.5, "2024-05-01T15:00:00+0000"),
                activity(2, 2.7, 410.555, "2024-05-01T15:00:01.250Z"),
            ],
        );
        let n = normalize_order(&o);
        assert!(n.rejects.is_empty());
        assert_eq!(n.fills.len(), 2);

        let a = &n.fills[0];
        assert_eq!(a.account_id, 7);
        assert_eq!(a.order_id, 42);
        assert_eq!(a.activity_id, 1);
        assert_eq!(a.side, Side::Sell);
        assert_eq!(a.symbol, "MSFT");
        assert_eq!(a.share_count, 3);
        assert_eq!(a.open_shares, 3);
        assert_eq!(a.price_cents, Cents::new(41_050));
        assert_eq!(a.executed_at, Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap());
        assert!(!a.matched);

        // 2.7 truncates to 2; 410.555 rounds to 41056
        assert_eq!(n.fills[1].share_count, 2);
        assert_eq!(n.fills[1].price_cents, Cents::new(41_056));
    }

    #[test]
    fn unfilled_and_option_orders_are_skipped_silently() {
        let a = vec![activity(1, 1.0, 1.0, "2024-05-01T15:00:00+0000")];
        assert_eq!(normalize_order(&order("WORKING", "EQUITY", "BUY", a.clone())), Normalized::default());
        assert_eq!(normalize_order(&order("FILLED", "OPTION", "BUY", a)), Normalized::default());
    }

    #[test]
    fn malformed_activities_are_rejected_individually() {
        let mut bad_legs = activity(4, 1.0, 1.0, "");
        bad_legs.execution_legs.clear();
        let o = order(
            "FILLED",
            "EQUITY",
            "BUY",
            vec![
                activity(1, 0.5, 10.0, "2024-05-01T15:00:00+0000"),
                activity(2, 1.0, f64::NAN, "2024-05-01T15:00:00+0000"),
                activity(3, 1.0, 10.0, "yesterday"),
                bad_legs,
                activity(5, 1.0, -1.0, "2024-05-01T15:00:00+0000"),
                activity(6, 1.0, 10.0, "2024-05-01T15:00:00+0000"),
            ],
        );
        let n = normalize_order(&o);
        assert_eq!(n.fills.len(), 1);
        assert_eq!(n.fills[0].activity_id, 6);

        let reasons: Vec<_> = n.rejects.iter().map(|r| (r.activity_id, r.reason.clone())).collect();
        assert_eq!(
            reasons,
            vec![
                (Some(1), NormalizeError::NonPositiveShares(0)),
                (Some(2), NormalizeError::InvalidPrice(CentsError::NonFinite)),
                (Some(3), NormalizeError::InvalidTime("yesterday".to_string())),
                (Some(4), NormalizeError::NoExecutionLegs),
                (Some(5), NormalizeError::NegativePrice(Cents::new(-100))),
            ]
        );
    }

    #[test]
    fn order_level_rejects() {
        let mut no_legs = order("FILLED", "EQUITY", "BUY", vec![]);
        no_legs.order_leg_collection.clear();
        assert_eq!(normalize_order(&no_legs).rejects[0].reason, NormalizeError::NoLegs);

        let short = order("FILLED", "EQUITY", "SELL_SHORT", vec![]);
        assert_eq!(
            normalize_order(&short).rejects[0].reason,
            NormalizeError::UnsupportedInstruction("SELL_SHORT".to_string())
        );
    }

    #[test]
    fn parses_both_offset_forms() {
        let want = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
        assert_eq!(parse_execution_time("2024-03-04T14:30:00+0000"), Some(want));
        assert_eq!(parse_execution_time("2024-03-04T14:30:00Z"), Some(want));
        assert_eq!(parse_execution_time("2024-03-04T09:30:00-05:00"), Some(want));
        assert_eq!(parse_execution_time("2024-03-04"), None);
    }
}
