//! gains-portfolio
//!
//! Pure tax-lot domain:
//! - `Fill` is the accounting atom, keyed by `(account_id, activity_id)`
//! - brokerage orders normalize into fills (integer shares, integer cents)
//! - FIFO lot matching produces realized gain/loss per tax year
//! - No IO, no clock, no logging; callers own persistence and reporting

mod fixedpoint;
mod ordering;
mod types;

pub mod matcher;
pub mod normalize;

pub use fixedpoint::{Cents, CentsError};
pub use matcher::{
    match_fifo, FillUpdate, LotMatch, MatchOutcome, RejectReason, RejectedFill, YearChange,
    LONG_TERM_THRESHOLD_DAYS,
};
pub use normalize::{
    normalize_order, normalize_orders, parse_execution_time, NormalizeError, NormalizeReject,
    Normalized,
};
pub use ordering::{canonical_cmp, sort_fills_canonical};
pub use types::{Fill, FillKey, Side, Term};
