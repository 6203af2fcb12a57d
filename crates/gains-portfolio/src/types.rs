use chrono::{DateTime, Utc};

use crate::fixedpoint::Cents;

/// BUY or SELL for fills.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire / storage spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    /// Buys sort before sells on a tied timestamp so lots open before they close.
    pub(crate) fn ordinal(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural identity of a fill: the brokerage activity id is unique per account.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FillKey {
    pub account_id: i64,
    pub activity_id: i64,
}

impl std::fmt::Display for FillKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.account_id, self.activity_id)
    }
}

/// One executed trade event (the accounting atom).
///
/// `share_count` is the executed quantity and never changes after insert.
/// `open_shares` is the part not yet consumed by lot matching; it starts equal
/// to `share_count` and only decreases. A fill is `matched` exactly when it has
/// been fully consumed, at which point `open_shares == 0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fill {
    pub account_id: i64,
    pub activity_id: i64,
    pub order_id: i64,
    pub symbol: String,
    pub side: Side,
    pub share_count: i64,
    pub open_shares: i64,
    pub price_cents: Cents,
    pub executed_at: DateTime<Utc>,
    pub matched: bool,
}

impl Fill {
    /// A freshly executed, fully open fill.
    #[allow(clippy::too_many_arguments)]
    pub fn new<S: Into<String>>(
        account_id: i64,
        activity_id: i64,
        order_id: i64,
        symbol: S,
        side: Side,
        share_count: i64,
        price_cents: Cents,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            activity_id,
            order_id,
            symbol: symbol.into(),
            side,
            share_count,
            open_shares: share_count,
            price_cents,
            executed_at,
            matched: false,
        }
    }

    pub fn key(&self) -> FillKey {
        FillKey {
            account_id: self.account_id,
            activity_id: self.activity_id,
        }
    }
}

/// Short- vs long-term holding classification of a matched lot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    Short,
    Long,
}

impl Term {
    pub fn as_str(self) -> &'static str {
        match self {
            Term::Short => "short",
            Term::Long => "long",
        }
    }
}
