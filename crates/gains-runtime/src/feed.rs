//! Feed transport seam.
//!
//! A feed carries one message per poll cycle: the raw JSON array of orders.
//! Delivery is at-least-once; the consumer commits an offset only after the
//! message's effects are durable. [`memory_feed`] is the in-process transport
//! the daemon wires between its poll and ingest tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub offset: u64,
    pub payload: String,
}

#[async_trait]
pub trait FeedProducer: Send + Sync {
    /// Publish one payload; returns its offset.
    async fn publish(&self, payload: String) -> Result<u64>;
}

#[async_trait]
pub trait FeedConsumer: Send {
    /// Next message, or `None` once the feed is closed and drained.
    async fn next(&mut self) -> Result<Option<FeedMessage>>;

    /// Record that everything up to and including `offset` is processed.
    async fn commit(&mut self, offset: u64) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-process feed
// ---------------------------------------------------------------------------

/// Bounded in-process feed. Offsets start at 0 and increase by one per
/// published message, in delivery order.
pub fn memory_feed(capacity: usize) -> (MemoryFeedProducer, MemoryFeedConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let committed = CommitCursor::default();
    (
        MemoryFeedProducer {
            tx,
            next_offset: Arc::new(Mutex::new(0)),
        },
        MemoryFeedConsumer {
            rx,
            last_delivered: None,
            committed,
        },
    )
}

#[derive(Clone)]
pub struct MemoryFeedProducer {
    tx: mpsc::Sender<FeedMessage>,
    // Held across the send so offsets match channel order.
    next_offset: Arc<Mutex<u64>>,
}

#[async_trait]
impl FeedProducer for MemoryFeedProducer {
    async fn publish(&self, payload: String) -> Result<u64> {
        let mut next = self.next_offset.lock().await;
        let offset = *next;
        if self.tx.send(FeedMessage { offset, payload }).await.is_err() {
            bail!("feed closed: consumer dropped");
        }
        *next += 1;
        Ok(offset)
    }
}

/// Read-only view of a consumer's committed offset.
#[derive(Clone, Default)]
pub struct CommitCursor {
    // committed offset + 1; 0 = nothing committed yet
    inner: Arc<AtomicU64>,
}

impl CommitCursor {
    pub fn committed(&self) -> Option<u64> {
        match self.inner.load(Ordering::Acquire) {
            0 => None,
            n => Some(n - 1),
        }
    }

    fn store(&self, offset: u64) {
        self.inner.store(offset + 1, Ordering::Release);
    }
}

pub struct MemoryFeedConsumer {
    rx: mpsc::Receiver<FeedMessage>,
    last_delivered: Option<u64>,
    committed: CommitCursor,
}

impl MemoryFeedConsumer {
    pub fn cursor(&self) -> CommitCursor {
        self.committed.clone()
    }
}

#[async_trait]
impl FeedConsumer for MemoryFeedConsumer {
    async fn next(&mut self) -> Result<Option<FeedMessage>> {
        let msg = self.rx.recv().await;
        if let Some(m) = &msg {
            self.last_delivered = Some(m.offset);
        }
        Ok(msg)
    }

    async fn commit(&mut self, offset: u64) -> Result<()> {
        match self.last_delivered {
            Some(last) if offset <= last => {}
            _ => bail!("commit of undelivered offset {offset}"),
        }
        if let Some(prev) = self.committed.committed() {
            if offset < prev {
                bail!("commit regressed: {offset} < {prev}");
            }
        }
        self.committed.store(offset);
        Ok(())
    }
}
