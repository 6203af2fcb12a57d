//! Scenario: The Ingestion Loop commits an offset only after its effects are
//! durable.
//!
//! # Invariants under test
//! - An undecodable message is skipped and committed; the loop continues.
//! - A transient store failure is retried and the message then commits.
//! - Store retry exhaustion ends the loop with an error and leaves the
//!   offset uncommitted.
//! - A failed commit ends the loop with an error.
//! - Cancellation ends the loop cleanly while it waits for a message.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use gains_db::MemoryLedgerStore;
use gains_runtime::{
    memory_feed, run_ingest_loop, AccountGate, FeedConsumer, FeedMessage, FeedProducer, Ingestor,
    RetryPolicy, RuntimeMetrics,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn buy_batch(activity_id: i64) -> String {
    json!([{
        "orderId": activity_id,
        "status": "FILLED",
        "accountNumber": 1,
        "orderLegCollection": [{
            "orderLegType": "EQUITY",
            "instruction": "BUY",
            "instrument": { "symbol": "ACME" }
        }],
        "orderActivityCollection": [{
            "activityId": activity_id,
            "quantity": 1.0,
            "executionLegs": [{ "price": 10.0, "time": "2024-01-02T15:00:00+0000" }]
        }]
    }])
    .to_string()
}

fn ingestor(store: Arc<MemoryLedgerStore>, attempts: u32) -> Ingestor {
    Ingestor::new(
        store,
        Arc::new(AccountGate::new()),
        RetryPolicy {
            attempts,
            backoff: Duration::from_millis(1),
        },
        Arc::new(RuntimeMetrics::new()),
    )
}

#[tokio::test]
async fn decode_failure_is_skipped_and_committed() {
    let store = Arc::new(MemoryLedgerStore::new());
    let ing = ingestor(store.clone(), 1);
    let (tx, mut rx) = memory_feed(8);
    let cursor = rx.cursor();

    tx.publish("this is not json".into()).await.unwrap();
    tx.publish(buy_batch(7)).await.unwrap();
    drop(tx);

    run_ingest_loop(&ing, &mut rx, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cursor.committed(), Some(1));
    assert_eq!(store.all_fills().len(), 1);
    let m = ing.metrics().snapshot();
    assert_eq!(m.decode_failures, 1);
    assert_eq!(m.messages_processed, 2);
}

#[tokio::test]
async fn transient_store_failure_is_retried_then_committed() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.fail_next_inserts(2);
    let ing = ingestor(store.clone(), 3);
    let (tx, mut rx) = memory_feed(8);
    let cursor = rx.cursor();

    tx.publish(buy_batch(7)).await.unwrap();
    drop(tx);

    run_ingest_loop(&ing, &mut rx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cursor.committed(), Some(0));
    assert_eq!(store.all_fills().len(), 1);
}

#[tokio::test]
async fn store_exhaustion_is_fatal_and_uncommitted() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.fail_next_inserts(10);
    let ing = ingestor(store.clone(), 2);
    let (tx, mut rx) = memory_feed(8);
    let cursor = rx.cursor();

    tx.publish(buy_batch(7)).await.unwrap();

    let err = run_ingest_loop(&ing, &mut rx, CancellationToken::new())
        .await
        .unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("offset 0"), "{msg}");
    assert!(msg.contains("insert_fills failed after 2 attempt(s)"), "{msg}");
    assert_eq!(cursor.committed(), None);
    assert!(store.all_fills().is_empty());
}

#[tokio::test]
async fn match_is_retried_after_insert_already_succeeded() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.fail_next_applies(1);
    let ing = ingestor(store.clone(), 3);
    let (tx, mut rx) = memory_feed(8);
    let cursor = rx.cursor();

    let payload = json!([
        {
            "orderId": 1, "status": "FILLED", "accountNumber": 1,
            "orderLegCollection": [{ "instruction": "BUY", "instrument": { "symbol": "ACME" } }],
            "orderActivityCollection": [{ "activityId": 1, "quantity": 2.0,
                "executionLegs": [{ "price": 10.0, "time": "2024-01-02T15:00:00+0000" }] }]
        },
        {
            "orderId": 2, "status": "FILLED", "accountNumber": 1,
            "orderLegCollection": [{ "instruction": "SELL", "instrument": { "symbol": "ACME" } }],
            "orderActivityCollection": [{ "activityId": 2, "quantity": 2.0,
                "executionLegs": [{ "price": 11.0, "time": "2024-01-03T15:00:00+0000" }] }]
        }
    ])
    .to_string();
    tx.publish(payload).await.unwrap();
    drop(tx);

    run_ingest_loop(&ing, &mut rx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cursor.committed(), Some(0));
    assert_eq!(store.apply_calls(), 2);
    assert!(store.all_fills().iter().all(|f| f.matched));
}

struct CommitFails {
    delivered: bool,
}

#[async_trait]
impl FeedConsumer for CommitFails {
    async fn next(&mut self) -> Result<Option<FeedMessage>> {
        if self.delivered {
            return Ok(None);
        }
        self.delivered = true;
        Ok(Some(FeedMessage {
            offset: 41,
            payload: "[]".into(),
        }))
    }

    async fn commit(&mut self, _offset: u64) -> Result<()> {
        bail!("broker connection lost")
    }
}

#[tokio::test]
async fn commit_failure_is_fatal() {
    let ing = ingestor(Arc::new(MemoryLedgerStore::new()), 1);
    let mut consumer = CommitFails { delivered: false };
    let err = run_ingest_loop(&ing, &mut consumer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("feed commit failed at offset 41"));
}

#[tokio::test]
async fn cancellation_stops_an_idle_loop() {
    let ing = ingestor(Arc::new(MemoryLedgerStore::new()), 1);
    let (_tx, mut rx) = memory_feed(8);
    let cancel = CancellationToken::new();

    let c = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        c.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), run_ingest_loop(&ing, &mut rx, cancel))
        .await
        .expect("loop must stop after cancel")
        .unwrap();
}
