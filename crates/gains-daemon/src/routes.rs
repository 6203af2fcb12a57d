//! Axum router and HTTP handlers for gains-daemon.
//!
//! `build_router` is the single entry point; `service.rs` attaches the
//! tracing layer so tests can drive the bare router.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gains_db::lifetime_total;
use tracing::error;

use crate::{
    api_types::{BalanceResponse, ErrorResponse, HealthResponse, LifetimeResponse, StatusResponse},
    state::AppState,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/balances", get(lifetime_balance))
        .route("/v1/balances/:year", get(year_balance))
        .with_state(state)
}

fn store_failure(e: anyhow::Error) -> Response {
    error!(error = %format!("{e:#}"), "balance read failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "ledger store unavailable".to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(StatusResponse {
            service: st.build.service,
            version: st.build.version,
            session_id: st.session_id,
            account_id: st.account_id,
            daemon_uptime_secs: st.uptime_secs(),
            config_fingerprint: st.config_fingerprint.clone(),
            metrics: st.metrics.snapshot(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/balances/:year
// ---------------------------------------------------------------------------

pub(crate) async fn year_balance(
    State(st): State<Arc<AppState>>,
    Path(year): Path<i32>,
) -> Response {
    match st.store.fetch_balance(st.account_id, year).await {
        Ok(Some(row)) => (StatusCode::OK, Json(BalanceResponse::from(&row))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no balance recorded for tax year {year}"),
            }),
        )
            .into_response(),
        Err(e) => store_failure(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/balances
// ---------------------------------------------------------------------------

pub(crate) async fn lifetime_balance(State(st): State<Arc<AppState>>) -> Response {
    let mut rows = match st.store.fetch_balances(st.account_id).await {
        Ok(rows) => rows,
        Err(e) => return store_failure(e),
    };
    rows.sort_by_key(|r| r.tax_year);

    let total = lifetime_total(&rows);
    (
        StatusCode::OK,
        Json(LifetimeResponse {
            account_id: st.account_id,
            years: rows.iter().map(BalanceResponse::from).collect(),
            lifetime_total_cents: total.raw(),
            lifetime_total: total.to_string(),
        }),
    )
        .into_response()
}
