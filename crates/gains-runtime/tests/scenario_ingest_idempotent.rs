//! Scenario: Ingestion is idempotent and matching is driven by SELLs.
//!
//! # Invariants under test
//! - The same batch delivered twice stores one row per fill identity and
//!   leaves balances and matched markers unchanged on the second delivery.
//! - A batch with only BUY fills inserts rows and never touches balances.
//! - A partially consumed BUY keeps its remainder durably; the next SELL
//!   continues from the remainder, not from the original share count.
//! - Two new fills for an account without a SELL in the batch do not trigger
//!   matching even if older SELLs are stored.

use std::sync::Arc;
use std::time::Duration;

use gains_db::{LedgerStore, MemoryLedgerStore};
use gains_portfolio::{Cents, FillKey};
use gains_runtime::{AccountGate, Ingestor, MatchRun, RetryPolicy, RuntimeMetrics};
use serde_json::{json, Value};

const ACCOUNT: i64 = 12345678;

fn order(order_id: i64, instruction: &str, activity_id: i64, qty: f64, price: f64, time: &str) -> Value {
    json!({
        "orderId": order_id,
        "status": "FILLED",
        "accountNumber": ACCOUNT,
        "orderLegCollection": [{
            "orderLegType": "EQUITY",
            "instruction": instruction,
            "instrument": { "assetType": "EQUITY", "symbol": "ACME" },
            "quantity": qty
        }],
        "orderActivityCollection": [{
            "activityType": "EXECUTION",
            "activityId": activity_id,
            "quantity": qty,
            "executionLegs": [{ "price": price, "quantity": qty, "time": time }]
        }]
    })
}

fn batch(orders: Vec<Value>) -> String {
    Value::Array(orders).to_string()
}

fn ingestor(store: Arc<MemoryLedgerStore>) -> Ingestor {
    Ingestor::new(
        store,
        Arc::new(AccountGate::new()),
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        },
        Arc::new(RuntimeMetrics::new()),
    )
}

fn key(activity_id: i64) -> FillKey {
    FillKey {
        account_id: ACCOUNT,
        activity_id,
    }
}

async fn net_2024(store: &MemoryLedgerStore) -> Option<Cents> {
    store
        .fetch_balance(ACCOUNT, 2024)
        .await
        .unwrap()
        .map(|b| b.net_change)
}

#[tokio::test]
async fn redelivered_batch_changes_nothing() {
    let store = Arc::new(MemoryLedgerStore::new());
    let ing = ingestor(store.clone());
    let payload = batch(vec![
        order(1, "BUY", 101, 10.0, 100.0, "2024-01-02T15:00:00+0000"),
        order(2, "SELL", 102, 10.0, 150.0, "2024-01-03T15:00:00+0000"),
    ]);

    let first = ing.process_message(&payload).await.unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(
        first.runs,
        vec![(
            ACCOUNT,
            MatchRun::Applied {
                lots: 1,
                net_change: Cents::new(50_000)
            }
        )]
    );
    assert_eq!(net_2024(&store).await, Some(Cents::new(50_000)));
    assert_eq!(store.apply_calls(), 1);

    let second = ing.process_message(&payload).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert!(second.runs.is_empty());
    assert_eq!(store.all_fills().len(), 2);
    assert_eq!(net_2024(&store).await, Some(Cents::new(50_000)));
    assert_eq!(store.apply_calls(), 1, "no second apply for a redelivery");
}

#[tokio::test]
async fn buy_only_batch_inserts_without_matching() {
    let store = Arc::new(MemoryLedgerStore::new());
    let ing = ingestor(store.clone());
    let report = ing
        .process_message(&batch(vec![
            order(1, "BUY", 101, 10.0, 100.0, "2024-01-02T15:00:00+0000"),
            order(2, "BUY", 102, 5.0, 120.0, "2024-01-02T16:00:00+0000"),
        ]))
        .await
        .unwrap();

    assert_eq!(report.inserted, 2);
    assert!(report.runs.is_empty());
    assert_eq!(store.apply_calls(), 0);
    assert_eq!(net_2024(&store).await, None);
    assert!(store.all_fills().iter().all(|f| !f.matched));
}

#[tokio::test]
async fn partial_consumption_survives_between_messages() {
    let store = Arc::new(MemoryLedgerStore::new());
    let ing = ingestor(store.clone());

    ing.process_message(&batch(vec![
        order(1, "BUY", 101, 10.0, 100.0, "2024-01-02T15:00:00+0000"),
        order(2, "BUY", 102, 5.0, 120.0, "2024-01-03T15:00:00+0000"),
    ]))
    .await
    .unwrap();
    ing.process_message(&batch(vec![order(
        3,
        "SELL",
        103,
        12.0,
        150.0,
        "2024-01-04T15:00:00+0000",
    )]))
    .await
    .unwrap();

    // 10 * (150 - 100) + 2 * (150 - 120)
    assert_eq!(net_2024(&store).await, Some(Cents::new(56_000)));
    let remainder = store.fill(key(102)).unwrap();
    assert_eq!((remainder.share_count, remainder.open_shares), (5, 3));
    assert!(!remainder.matched);
    assert!(store.fill(key(101)).unwrap().matched);
    assert!(store.fill(key(103)).unwrap().matched);

    // A later SELL of 3 consumes exactly the remainder.
    ing.process_message(&batch(vec![order(
        4,
        "SELL",
        104,
        3.0,
        130.0,
        "2024-01-05T15:00:00+0000",
    )]))
    .await
    .unwrap();
    assert_eq!(net_2024(&store).await, Some(Cents::new(56_000 + 3 * 1_000)));
    assert!(store.fill(key(102)).unwrap().matched);
}

#[tokio::test]
async fn late_buy_without_sell_in_batch_waits_for_reconcile() {
    let store = Arc::new(MemoryLedgerStore::new());
    let ing = ingestor(store.clone());

    // SELL arrives before its BUY: nothing to consume yet, SELL stays open.
    let r = ing
        .process_message(&batch(vec![order(
            2,
            "SELL",
            202,
            4.0,
            50.0,
            "2024-02-02T15:00:00+0000",
        )]))
        .await
        .unwrap();
    assert_eq!(r.runs, vec![(ACCOUNT, MatchRun::NothingToMatch)]);

    // The BUY alone does not trigger matching.
    let r = ing
        .process_message(&batch(vec![order(
            1,
            "BUY",
            201,
            4.0,
            40.0,
            "2024-02-01T15:00:00+0000",
        )]))
        .await
        .unwrap();
    assert!(r.runs.is_empty());
    assert_eq!(net_2024(&store).await, None);

    // Reconciliation (as run at startup) closes the pair.
    let run = ing.reconcile_account(ACCOUNT).await.unwrap();
    assert_eq!(
        run,
        MatchRun::Applied {
            lots: 1,
            net_change: Cents::new(4_000)
        }
    );
    assert_eq!(net_2024(&store).await, Some(Cents::new(4_000)));
}

#[tokio::test]
async fn rejected_orders_do_not_block_the_rest_of_the_batch() {
    let store = Arc::new(MemoryLedgerStore::new());
    let ing = ingestor(store.clone());
    let mut bad_time = order(1, "BUY", 301, 1.0, 10.0, "yesterday");
    bad_time["orderId"] = json!(9);
    let report = ing
        .process_message(&batch(vec![
            bad_time,
            order(2, "BUY", 302, 1.0, 10.0, "2024-03-01T15:00:00+0000"),
        ]))
        .await
        .unwrap();
    assert_eq!(report.rejects, 1);
    assert_eq!(report.inserted, 1);
    assert!(store.fill(key(302)).is_some());
}
