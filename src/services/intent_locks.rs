//! Per-intent serialization
//!
//! Transitions for one intent run one at a time; different intents never
//! contend. Entries are dropped from the table once nobody holds or waits on
//! them, so the table stays proportional to in-flight work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Clone, Default)]
pub struct IntentLocks {
    table: Arc<LockTable>,
}

/// Held while an intent is being transitioned.
pub struct IntentLockGuard {
    intent_id: String,
    table: Arc<LockTable>,
    guard: OwnedMutexGuard<()>,
}

fn lock_table(table: &LockTable) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IntentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, intent_id: &str) -> IntentLockGuard {
        let entry = lock_table(&self.table)
            .entry(intent_id.to_string())
            .or_default()
            .clone();

        IntentLockGuard {
            intent_id: intent_id.to_string(),
            table: self.table.clone(),
            guard: entry.lock_owned().await,
        }
    }

    /// Number of intents currently locked or awaited.
    pub fn len(&self) -> usize {
        lock_table(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for IntentLockGuard {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        // One reference in the table, one inside our guard: nobody else waits.
        let idle = table
            .get(&self.intent_id)
            .is_some_and(|entry| {
                Arc::ptr_eq(entry, OwnedMutexGuard::mutex(&self.guard))
                    && Arc::strong_count(entry) == 2
            });
        if idle {
            table.remove(&self.intent_id);
        }
    }
}
