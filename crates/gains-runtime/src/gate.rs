use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per account. A matching run (read unmatched set → match →
/// persist) holds its account's guard for the whole sequence, so two runs for
/// the same account never interleave. Different accounts never contend.
#[derive(Default)]
pub struct AccountGate {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl AccountGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(account_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}
