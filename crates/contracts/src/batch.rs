//! Per-key batch state and the values produced by a flush

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::{BatchKey, Item};

/// Durable state of one key.
///
/// A key that has never been seen behaves exactly like `BatchState::default()`:
/// generation 0 with no items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchState {
    /// Identifies the currently open batch. Advanced once per flush.
    pub generation: u64,

    /// Items of the open generation, in arrival order.
    #[serde(default)]
    pub items: Vec<Item>,
}

impl BatchState {
    /// Append an item to the open generation, returning the new length.
    pub fn push(&mut self, item: Item) -> usize {
        self.items.push(item);
        self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `generation` still names the open batch.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Close the open generation.
    ///
    /// Moves the items out into an immutable [`Batch`] stamped with the closing
    /// generation and opens the next, empty generation in place. The caller
    /// persists `self` afterwards as a single write.
    pub fn close(&mut self, key: &BatchKey) -> Batch {
        let items = std::mem::take(&mut self.items);
        let batch = Batch::new(key.clone(), self.generation, items);
        self.generation += 1;
        batch
    }
}

/// Request to flush `generation` of `key`, carried by a timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlushRequest {
    pub key: BatchKey,
    pub generation: u64,
}

impl FlushRequest {
    pub fn new(key: BatchKey, generation: u64) -> Self {
        Self { key, generation }
    }
}

impl fmt::Display for FlushRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.generation)
    }
}

/// A closed batch, ready for the sink.
///
/// Cloning is cheap and never copies items, so the same captured batch can be
/// handed to a retry without re-reading key state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    key: BatchKey,
    generation: u64,
    items: Arc<[Item]>,
}

impl Batch {
    pub fn new(key: BatchKey, generation: u64, items: Vec<Item>) -> Self {
        Self {
            key,
            generation,
            items: items.into(),
        }
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// The receive that filled the batch to `max_batch_size`.
    Size,
    /// The wait timer for the generation fired while it was still open.
    Timer,
    /// The timer could not be scheduled, so the batch was closed immediately.
    TimerFallback,
    /// Shutdown drain.
    Drain,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::TimerFallback => "timer_fallback",
            FlushTrigger::Drain => "drain",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
