//! Process-wide credential state.
//!
//! The current token pair lives in a `watch` channel holding an
//! `Arc<TokenPair>`. A refresh publishes a whole new pair in one store, so a
//! reader either sees the old pair or the new one, never a bearer token from
//! one pair with the refresh token of another. Readers clone the `Arc` per
//! request and never cache it across requests.

use std::sync::Arc;

use tokio::sync::{watch, Notify};

/// Bearer + refresh token, always replaced together.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub bearer: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(bearer: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            bearer: bearer.into(),
            refresh: refresh.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bearer.is_empty() || self.refresh.is_empty()
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("bearer", &"<REDACTED>")
            .field("refresh", &"<REDACTED>")
            .finish()
    }
}

/// Atomically swappable handle to the current [`TokenPair`]. Cheap to clone;
/// all clones share the same cell.
#[derive(Clone)]
pub struct CredentialCell {
    tx: Arc<watch::Sender<Arc<TokenPair>>>,
}

impl CredentialCell {
    pub fn new(initial: TokenPair) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// The pair current at the time of the call.
    pub fn current(&self) -> Arc<TokenPair> {
        self.tx.borrow().clone()
    }

    /// Replace the pair. Visible to every `current()` call that starts after
    /// this returns.
    pub fn publish(&self, pair: TokenPair) {
        self.tx.send_replace(Arc::new(pair));
    }
}

impl std::fmt::Debug for CredentialCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCell").finish_non_exhaustive()
    }
}

/// Lets the fetch path ask the refresh loop for an immediate refresh after an
/// authentication failure. Requests made while no one is waiting are kept
/// (at most one) and consumed by the next wait.
#[derive(Clone, Default)]
pub struct RefreshTrigger {
    notify: Arc<Notify>,
}

impl RefreshTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn publish_replaces_whole_pair() {
        let cell = CredentialCell::new(TokenPair::new("b0", "r0"));
        let clone = cell.clone();
        let before = clone.current();
        cell.publish(TokenPair::new("b1", "r1"));
        assert_eq!(*before, TokenPair::new("b0", "r0"));
        assert_eq!(*clone.current(), TokenPair::new("b1", "r1"));
    }

    #[test]
    fn debug_redacts() {
        let dbg = format!("{:?}", TokenPair::new("bearer-secret", "refresh-secret"));
        assert!(!dbg.contains("secret"));
    }

    #[tokio::test]
    async fn trigger_requested_before_wait_is_not_lost() {
        let t = RefreshTrigger::new();
        t.request();
        tokio::time::timeout(Duration::from_secs(1), t.requested())
            .await
            .expect("stored permit must wake the waiter");
    }

    #[tokio::test]
    async fn concurrent_readers_never_see_a_torn_pair() {
        let cell = CredentialCell::new(TokenPair::new("bearer-0", "refresh-0"));

        let writer = {
            let cell = cell.clone();
            tokio::spawn(async move {
                for i in 1..=2_000 {
                    cell.publish(TokenPair::new(format!("bearer-{i}"), format!("refresh-{i}")));
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cell = cell.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..2_000 {
                    let pair = cell.current();
                    let b = pair.bearer.trim_start_matches("bearer-");
                    let r = pair.refresh.trim_start_matches("refresh-");
                    assert_eq!(b, r, "torn pair observed: {pair:?}");
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
    }
}
