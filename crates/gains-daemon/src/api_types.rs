//! Response types for the gains-daemon HTTP endpoints.
//!
//! Amounts are reported twice: integer cents for machines, a `$` string for
//! people reading the JSON.

use gains_db::BalanceRow;
use gains_runtime::MetricsSnapshot;
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub session_id: Uuid,
    pub account_id: i64,
    pub daemon_uptime_secs: u64,
    pub config_fingerprint: String,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

// ---------------------------------------------------------------------------
// /v1/balances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceResponse {
    pub account_id: i64,
    pub tax_year: i32,
    pub net_change_cents: i64,
    pub short_term_cents: i64,
    pub long_term_cents: i64,
    pub carryover_loss_cents: i64,
    /// Net change with the carryover loss applied.
    pub after_carryover_cents: i64,
    pub net_change: String,
}

impl From<&BalanceRow> for BalanceResponse {
    fn from(b: &BalanceRow) -> Self {
        Self {
            account_id: b.account_id,
            tax_year: b.tax_year,
            net_change_cents: b.net_change.raw(),
            short_term_cents: b.short_term.raw(),
            long_term_cents: b.long_term.raw(),
            carryover_loss_cents: b.carryover_loss.raw(),
            after_carryover_cents: b.after_carryover().raw(),
            net_change: b.net_change.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifetimeResponse {
    pub account_id: i64,
    pub years: Vec<BalanceResponse>,
    pub lifetime_total_cents: i64,
    pub lifetime_total: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
