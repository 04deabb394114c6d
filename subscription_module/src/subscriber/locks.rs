use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::SubscriberId;

/// Serializes read-modify-write sequences per subscriber.
///
/// Conversation turns, job handlers, the expiry scan and the payment webhook all acquire the
/// subscriber's guard before re-reading the record, so their updates to one record never
/// interleave. Different subscribers never contend.
#[derive(Debug, Default)]
pub struct SubscriberLocks {
    entries: Mutex<HashMap<SubscriberId, Arc<AsyncMutex<()>>>>,
}

impl SubscriberLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: SubscriberId) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            // Drop entries nobody holds or waits on.
            entries.retain(|key, lock| *key == id || Arc::strong_count(lock) > 1);
            entries
                .entry(id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }
}
