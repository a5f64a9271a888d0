//! Per-document async locks.
//!
//! The core library assumes a single writer per document id. Handlers take
//! the lock of every id they touch before running a core operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock table keyed by document id.
#[derive(Default)]
pub struct DocumentLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Guards held for the duration of one request.
pub struct DocumentGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl DocumentLocks {
    /// Lock every id in `ids`. Ids are locked in sorted order so that two
    /// requests touching the same pair cannot deadlock.
    pub async fn lock(&self, ids: &[&str]) -> DocumentGuards {
        let mut ids: Vec<&str> = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let mutex = self.entry(id);
            guards.push(mutex.lock_owned().await);
        }
        DocumentGuards { _guards: guards }
    }

    fn entry(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop entries nobody holds or waits on.
        table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        Arc::clone(table.entry(id.to_string()).or_default())
    }

    /// Number of ids currently tracked.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_id_is_exclusive() {
        let locks = Arc::new(DocumentLocks::default());
        let guard = locks.lock(&["foo"]).await;

        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _guard = other.lock(&["foo", "bar"]).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_block() {
        let locks = DocumentLocks::default();
        let _foo = locks.lock(&["foo"]).await;
        let _bar = tokio::time::timeout(Duration::from_secs(1), locks.lock(&["bar", "bar"]))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = DocumentLocks::default();
        drop(locks.lock(&["foo"]).await);
        drop(locks.lock(&["bar"]).await);
        assert_eq!(locks.len(), 1);
    }
}
