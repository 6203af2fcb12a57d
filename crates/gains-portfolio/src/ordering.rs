//! Fill ordering policy.
//!
//! The matcher must produce the same outcome for the same set of fills no
//! matter in which order batches arrived from the feed. Fills are therefore
//! sorted into a canonical order before lots are walked.
//!
//! # Canonical sort key
//!
//! `(executed_at, side_ord, activity_id)` ascending, stable.
//! `side_ord`: `Buy = 0`, `Sell = 1`, so a buy and a sell stamped with the
//! same second open the lot before closing it. `activity_id` makes the key
//! total; two fills only compare equal if they are the same fill.

use std::cmp::Ordering;

use crate::types::Fill;

/// Compare two fills by the canonical key.
pub fn canonical_cmp(a: &Fill, b: &Fill) -> Ordering {
    a.executed_at
        .cmp(&b.executed_at)
        .then_with(|| a.side.ordinal().cmp(&b.side.ordinal()))
        .then_with(|| a.activity_id.cmp(&b.activity_id))
}

/// Sort `fills` into canonical order in place.
pub fn sort_fills_canonical(fills: &mut [Fill]) {
    fills.sort_by(canonical_cmp);
}
