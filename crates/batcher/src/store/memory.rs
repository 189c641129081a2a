use std::collections::HashMap;

use contracts::{BatchKey, BatchState, ContractError, KeyStateStore};
use tokio::sync::RwLock;

/// In-process key state. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<BatchKey, BatchState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with stored state.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

impl KeyStateStore for MemoryStateStore {
    async fn load(&self, key: &BatchKey) -> Result<Option<BatchState>, ContractError> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn generation(&self, key: &BatchKey) -> Result<u64, ContractError> {
        Ok(self
            .states
            .read()
            .await
            .get(key)
            .map_or(0, |state| state.generation))
    }

    async fn save(&self, key: &BatchKey, state: &BatchState) -> Result<(), ContractError> {
        self.states.write().await.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<BatchKey>, ContractError> {
        Ok(self.states.read().await.keys().cloned().collect())
    }
}
