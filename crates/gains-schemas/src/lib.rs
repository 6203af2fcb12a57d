//! Wire shapes for the brokerage REST payloads.
//!
//! These mirror the JSON the brokerage returns verbatim. Numbers stay in
//! their wire form (`f64` quantities and prices, string timestamps); the
//! normalizer in `gains-portfolio` is the only place that converts them to
//! canonical integer shares / cents / UTC timestamps.
//!
//! Every struct is `#[serde(default)]` so that absent fields decode to zero
//! values instead of failing the whole batch.

use serde::{Deserialize, Serialize};

/// Order status that makes an order eligible for fill extraction.
pub const STATUS_FILLED: &str = "FILLED";

/// Leg type excluded from fill extraction.
pub const LEG_TYPE_OPTION: &str = "OPTION";

pub const INSTRUCTION_BUY: &str = "BUY";
pub const INSTRUCTION_SELL: &str = "SELL";

/// One order as returned by `GET /accounts/{hash}/orders`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Order {
    pub session: String,
    pub duration: String,
    pub order_type: String,
    pub complex_order_strategy_type: String,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub remaining_quantity: f64,
    pub price: f64,
    pub order_leg_collection: Vec<OrderLeg>,
    pub order_strategy_type: String,
    pub order_id: i64,
    pub status: String,
    pub entered_time: String,
    pub close_time: String,
    pub tag: String,
    pub account_number: i64,
    pub order_activity_collection: Vec<OrderActivity>,
}

impl Order {
    /// The leg that carries instruction and instrument. Equity orders have
    /// exactly one; multi-leg orders are not handled.
    pub fn primary_leg(&self) -> Option<&OrderLeg> {
        self.order_leg_collection.first()
    }

    /// True when the primary leg is a SELL instruction, regardless of status.
    pub fn is_sell(&self) -> bool {
        self.primary_leg()
            .map(|leg| leg.instruction == INSTRUCTION_SELL)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderLeg {
    pub order_leg_type: String,
    pub leg_id: i64,
    pub instrument: Instrument,
    pub instruction: String,
    pub position_effect: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Instrument {
    pub asset_type: String,
    pub cusip: String,
    pub symbol: String,
    pub instrument_id: i64,
}

/// One execution activity of an order. Each activity becomes one fill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderActivity {
    pub activity_type: String,
    pub activity_id: i64,
    pub execution_type: String,
    pub quantity: f64,
    pub order_remaining_quantity: f64,
    pub execution_legs: Vec<ExecutionLeg>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionLeg {
    pub leg_id: i64,
    pub quantity: f64,
    pub mismarked_quantity: f64,
    pub price: f64,
    /// Execution time, e.g. `2024-03-04T14:30:00+0000`.
    pub time: String,
    pub instrument_id: i64,
}

/// One entry of `GET /accounts/accountNumbers`.
///
/// The plaintext number is only used locally; every subsequent call uses
/// the opaque `hash_value`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountNumber {
    pub account_number: String,
    pub hash_value: String,
}

/// OAuth token endpoint response.
///
/// `refresh_token` is absent on some refresh responses; callers keep the
/// previous one in that case.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<REDACTED>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<REDACTED>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}
