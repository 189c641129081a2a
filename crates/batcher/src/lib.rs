//! # Batcher
//!
//! Key-partitioned batching.
//!
//! Responsibilities:
//! - Accumulate items per key into the key's open batch
//! - Close a batch when it reaches `max_batch_size` or `max_wait_ms` after its
//!   first item, whichever comes first, and exactly once
//! - Hand closed batches to the `Dispatcher`
//!
//! ## Generations
//!
//! Every key has a generation counter naming its open batch. Closing a batch
//! advances the counter in the same write that empties the items, so a timer
//! armed for an older generation recognizes itself as stale and does nothing.
//!
//! ## Usage
//!
//! ```ignore
//! use batcher::{BatchEngine, MemoryStateStore};
//!
//! let dispatcher = dispatcher::create_dispatcher(&config.sink, &config.dispatch).await?;
//! let engine = BatchEngine::start(config.batcher.clone(), MemoryStateStore::new(), dispatcher);
//!
//! engine.receive("orders".into(), payload.into()).await?;
//!
//! let report = engine.shutdown().await?;
//! ```

mod accumulator;
mod coordinator;
mod engine;
mod error;
mod flush;
pub mod store;
mod timer;
mod turns;

#[cfg(test)]
mod testing;

pub use accumulator::{BatchAccumulator, ReceiveOutcome};
pub use coordinator::{FlushCoordinator, TimerOutcome};
pub use engine::{BatchEngine, DrainReport, TimerStats, TimerStatsSnapshot};
pub use error::{BatchError, Result};
pub use flush::FlushReport;
pub use store::{ConfiguredStore, FileStateStore, MemoryStateStore};
pub use timer::TokioTimer;
pub use turns::{KeyTurns, Turn};
