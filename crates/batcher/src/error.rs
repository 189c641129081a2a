//! Batcher error types

use contracts::{Batch, BatchKey, ContractError};
use dispatcher::DispatcherError;
use thiserror::Error;

/// Errors surfaced by `receive`, `on_timer_fire` and the engine.
///
/// A stale timer fire is not an error; see `TimerOutcome`.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Keys must name a partition
    #[error("batch key must not be empty")]
    InvalidKey,

    /// Key state could not be read or written; nothing was committed
    #[error("key state store unavailable for '{key}': {source}")]
    StoreUnavailable {
        key: String,
        #[source]
        source: ContractError,
    },

    /// No wait timer could be armed and the batch could not be closed early
    /// either. The item is stored and waits for the size trigger or a drain.
    #[error("could not schedule flush timer for {key}@{generation}: {source}")]
    TimerScheduling {
        key: String,
        generation: u64,
        #[source]
        source: ContractError,
    },

    /// The batch was closed and the key has moved on, but the sink did not
    /// take it. Retry with `batch`, never with the key's current state.
    #[error("batch {}@{} closed but not delivered: {source}", .batch.key(), .batch.generation())]
    DispatchFailed {
        batch: Batch,
        #[source]
        source: DispatcherError,
    },

    /// Sink flush/close failure during shutdown
    #[error("sink lifecycle error: {0}")]
    Sink(#[source] DispatcherError),
}

impl BatchError {
    pub(crate) fn store(key: &BatchKey, source: ContractError) -> Self {
        Self::StoreUnavailable {
            key: key.to_string(),
            source,
        }
    }

    /// The captured batch of a failed dispatch, for retrying.
    pub fn undelivered_batch(&self) -> Option<&Batch> {
        match self {
            BatchError::DispatchFailed { batch, .. } => Some(batch),
            _ => None,
        }
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, BatchError::StoreUnavailable { .. })
    }
}

/// Batcher Result type alias
pub type Result<T> = std::result::Result<T, BatchError>;
