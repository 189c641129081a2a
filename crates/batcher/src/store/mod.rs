//! Key state stores
//!
//! `MemoryStateStore` for single-process runs, `FileStateStore` when state
//! must outlive the process, and `ConfiguredStore` to pick one from
//! `StoreConfig` at runtime.

mod file;
mod memory;

pub use self::file::FileStateStore;
pub use self::memory::MemoryStateStore;

use contracts::{BatchKey, BatchState, ContractError, KeyStateStore, StoreConfig, StoreKind};

/// Store selected by `StoreConfig::kind`
#[derive(Debug)]
pub enum ConfiguredStore {
    Memory(MemoryStateStore),
    File(FileStateStore),
}

impl ConfiguredStore {
    pub async fn open(config: &StoreConfig) -> Result<Self, ContractError> {
        match config.kind {
            StoreKind::Memory => Ok(ConfiguredStore::Memory(MemoryStateStore::new())),
            StoreKind::File => {
                let path = config.path.as_ref().ok_or_else(|| {
                    ContractError::config_validation("store.path", "file store needs a path")
                })?;
                FileStateStore::open(path).await.map(ConfiguredStore::File)
            }
        }
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            ConfiguredStore::Memory(_) => StoreKind::Memory,
            ConfiguredStore::File(_) => StoreKind::File,
        }
    }
}

impl KeyStateStore for ConfiguredStore {
    async fn load(&self, key: &BatchKey) -> Result<Option<BatchState>, ContractError> {
        match self {
            ConfiguredStore::Memory(store) => store.load(key).await,
            ConfiguredStore::File(store) => store.load(key).await,
        }
    }

    async fn generation(&self, key: &BatchKey) -> Result<u64, ContractError> {
        match self {
            ConfiguredStore::Memory(store) => store.generation(key).await,
            ConfiguredStore::File(store) => store.generation(key).await,
        }
    }

    async fn save(&self, key: &BatchKey, state: &BatchState) -> Result<(), ContractError> {
        match self {
            ConfiguredStore::Memory(store) => store.save(key, state).await,
            ConfiguredStore::File(store) => store.save(key, state).await,
        }
    }

    async fn keys(&self) -> Result<Vec<BatchKey>, ContractError> {
        match self {
            ConfiguredStore::Memory(store) => store.keys().await,
            ConfiguredStore::File(store) => store.keys().await,
        }
    }
}
