//! BatchSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for Sinks.

use crate::{Batch, ContractError};

/// Downstream batch receiver
///
/// All sink implementations must implement this trait. A `write` either
/// delivers the whole batch or fails; sinks give no idempotency guarantee,
/// so a retried batch may arrive twice if the first attempt failed late.
/// Sinks that need exactly-once delivery deduplicate on
/// `(batch.key(), batch.generation())`.
#[trait_variant::make(BatchSink: Send)]
pub trait LocalBatchSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one closed batch
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
