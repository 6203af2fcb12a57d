use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters shared by the background tasks and read by the status route.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    messages_processed: AtomicU64,
    decode_failures: AtomicU64,
    fills_inserted: AtomicU64,
    fill_rejects: AtomicU64,
    match_runs_applied: AtomicU64,
    lots_matched: AtomicU64,
    invariant_violations: AtomicU64,
    polls_ok: AtomicU64,
    polls_failed: AtomicU64,
    refresh_ok: AtomicU64,
    refresh_failed: AtomicU64,
    last_net_change_cents: AtomicI64,
    last_refresh: Mutex<Option<RefreshOutcome>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_processed: u64,
    pub decode_failures: u64,
    pub fills_inserted: u64,
    pub fill_rejects: u64,
    pub match_runs_applied: u64,
    pub lots_matched: u64,
    pub invariant_violations: u64,
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub refresh_ok: u64,
    pub refresh_failed: u64,
    pub last_net_change_cents: i64,
    pub last_refresh: Option<RefreshOutcome>,
}

fn bump(c: &AtomicU64, n: u64) {
    c.fetch_add(n, Ordering::Relaxed);
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn message_processed(&self) {
        bump(&self.messages_processed, 1);
    }

    pub(crate) fn decode_failed(&self) {
        bump(&self.decode_failures, 1);
    }

    pub(crate) fn fills_inserted(&self, n: usize) {
        bump(&self.fills_inserted, n as u64);
    }

    pub(crate) fn fills_rejected(&self, n: usize) {
        bump(&self.fill_rejects, n as u64);
    }

    pub(crate) fn match_applied(&self, lots: usize, net_change_cents: i64) {
        bump(&self.match_runs_applied, 1);
        bump(&self.lots_matched, lots as u64);
        self.last_net_change_cents
            .store(net_change_cents, Ordering::Relaxed);
    }

    pub(crate) fn invariant_violated(&self) {
        bump(&self.invariant_violations, 1);
    }

    pub(crate) fn poll(&self, ok: bool) {
        bump(if ok { &self.polls_ok } else { &self.polls_failed }, 1);
    }

    pub(crate) fn refresh(&self, ok: bool, reason: &'static str) {
        bump(if ok { &self.refresh_ok } else { &self.refresh_failed }, 1);
        let mut last = self.last_refresh.lock().unwrap_or_else(|p| p.into_inner());
        *last = Some(RefreshOutcome {
            at: Utc::now(),
            ok,
            reason,
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_processed: load(&self.messages_processed),
            decode_failures: load(&self.decode_failures),
            fills_inserted: load(&self.fills_inserted),
            fill_rejects: load(&self.fill_rejects),
            match_runs_applied: load(&self.match_runs_applied),
            lots_matched: load(&self.lots_matched),
            invariant_violations: load(&self.invariant_violations),
            polls_ok: load(&self.polls_ok),
            polls_failed: load(&self.polls_failed),
            refresh_ok: load(&self.refresh_ok),
            refresh_failed: load(&self.refresh_failed),
            last_net_change_cents: self.last_net_change_cents.load(Ordering::Relaxed),
            last_refresh: self
                .last_refresh
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
        }
    }
}
