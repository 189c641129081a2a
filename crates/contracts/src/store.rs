//! KeyStateStore trait - durable per-key batch state
//!
//! The batcher serializes writers per key; a store only has to make each
//! individual `save` all-or-nothing.

use crate::{BatchKey, BatchState, ContractError};

/// Durable key-state storage.
#[trait_variant::make(KeyStateStore: Send)]
pub trait LocalKeyStateStore {
    /// Load the stored state of `key`, `None` if the key was never written.
    async fn load(&self, key: &BatchKey) -> Result<Option<BatchState>, ContractError>;

    /// Read only the stored generation (0 for unknown keys).
    ///
    /// Called without holding the key's turn, so implementations should make
    /// this cheaper than a full `load` where they can.
    async fn generation(&self, key: &BatchKey) -> Result<u64, ContractError>;

    /// Replace the stored state of `key` in one write.
    async fn save(&self, key: &BatchKey, state: &BatchState) -> Result<(), ContractError>;

    /// Every key that has stored state.
    async fn keys(&self) -> Result<Vec<BatchKey>, ContractError>;
}
