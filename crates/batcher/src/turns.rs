//! Per-key turns
//!
//! A turn is the exclusive right to read-modify-write one key's state. Turns
//! for different keys are independent.

use std::collections::HashMap;
use std::sync::Arc;

use contracts::BatchKey;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Table of per-key async locks.
#[derive(Debug, Default)]
pub struct KeyTurns {
    slots: Mutex<HashMap<BatchKey, Arc<Mutex<()>>>>,
}

/// Held while a task owns a key's state. Released on drop.
///
/// Dropping the last turn for a key with nobody waiting also removes the
/// key's slot, so the table only holds keys in use.
#[derive(Debug)]
pub struct Turn {
    key: BatchKey,
    turns: Arc<KeyTurns>,
    _guard: OwnedMutexGuard<()>,
}

impl Turn {
    pub fn key(&self) -> &BatchKey {
        &self.key
    }
}

impl KeyTurns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it.
    pub async fn acquire(self: &Arc<Self>, key: &BatchKey) -> Turn {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        trace!(key = %key, "turn acquired");
        Turn {
            key: key.clone(),
            turns: Arc::clone(self),
            _guard: guard,
        }
    }

    /// Drop slots nobody holds or waits for. Returns how many were removed.
    ///
    /// A slot is only ever cloned under the table lock, so a count of one
    /// here means no task can be about to lock it.
    pub async fn prune(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    /// Number of keys with a slot.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        // Skipped when the table is busy; `prune` sweeps what is left.
        let Ok(mut slots) = self.turns.slots.try_lock() else {
            return;
        };
        // One reference in the table, one in our guard: no waiters.
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 2)
        {
            slots.remove(&self.key);
            trace!(key = %self.key, "turn slot released");
        }
    }
}
