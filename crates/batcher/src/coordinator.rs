//! FlushCoordinator - resolves timer fires against the current generation

use std::sync::Arc;

use contracts::{BatchKey, BatchSink, FlushTrigger, KeyStateStore};
use dispatcher::Dispatcher;
use tracing::{debug, instrument};

use crate::error::{BatchError, Result};
use crate::flush::{FlushReport, Flusher};
use crate::turns::KeyTurns;

/// What a timer fire amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The generation had already been closed; caught without taking the turn
    Stale,
    /// It was closed while this fire waited for the turn
    StaleAfterRecheck,
    /// Still current but holding no items, nothing to send
    Empty,
    Flushed(FlushReport),
}

impl TimerOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, TimerOutcome::Stale | TimerOutcome::StaleAfterRecheck)
    }

    pub fn flush_report(&self) -> Option<&FlushReport> {
        match self {
            TimerOutcome::Flushed(report) => Some(report),
            _ => None,
        }
    }
}

/// Turns timer fires into flushes, at most one per generation.
///
/// A fire carries the generation that was open when its timer was armed. It
/// may arrive arbitrarily late, after the size trigger or another fire has
/// closed that generation, and then it must do nothing.
pub struct FlushCoordinator<S, K> {
    turns: Arc<KeyTurns>,
    store: Arc<S>,
    flusher: Flusher<S, K>,
}

impl<S, K> Clone for FlushCoordinator<S, K> {
    fn clone(&self) -> Self {
        Self {
            turns: Arc::clone(&self.turns),
            store: Arc::clone(&self.store),
            flusher: self.flusher.clone(),
        }
    }
}

impl<S, K> FlushCoordinator<S, K>
where
    S: KeyStateStore + Sync,
    K: BatchSink,
{
    pub fn new(turns: Arc<KeyTurns>, store: Arc<S>, dispatcher: Arc<Dispatcher<K>>) -> Self {
        Self {
            turns,
            flusher: Flusher::new(Arc::clone(&store), dispatcher),
            store,
        }
    }

    /// Handle the wait timer for `generation` of `key`.
    #[instrument(name = "coordinator_timer_fire", skip(self), fields(key = %key))]
    pub async fn on_timer_fire(&self, key: &BatchKey, generation: u64) -> Result<TimerOutcome> {
        // Most fires on a busy key are stale; drop them without queueing for the turn.
        let stored = self
            .store
            .generation(key)
            .await
            .map_err(|e| BatchError::store(key, e))?;
        if stored != generation {
            observability::record_stale_timer("fast");
            debug!(generation, stored, "Stale timer fire");
            return Ok(TimerOutcome::Stale);
        }

        self.flush_if_current(key, generation, FlushTrigger::Timer)
            .await
    }

    /// Flush `generation` if it is still open, checked under the turn.
    async fn flush_if_current(
        &self,
        key: &BatchKey,
        generation: u64,
        trigger: FlushTrigger,
    ) -> Result<TimerOutcome> {
        let turn = self.turns.acquire(key).await;
        let state = self
            .store
            .load(key)
            .await
            .map_err(|e| BatchError::store(key, e))?
            .unwrap_or_default();

        if !state.is_current(generation) {
            observability::record_stale_timer("slow");
            debug!(generation, stored = state.generation, "Timer fire lost the race");
            return Ok(TimerOutcome::StaleAfterRecheck);
        }
        if state.is_empty() {
            debug!(generation, "Timer fire on empty batch");
            return Ok(TimerOutcome::Empty);
        }

        self.flusher
            .flush(&turn, state, trigger)
            .await
            .map(TimerOutcome::Flushed)
    }

    /// Close whatever batch `key` has open, whichever generation it is.
    ///
    /// Used by drain; returns `None` when the key has nothing buffered.
    pub async fn flush_open(
        &self,
        key: &BatchKey,
        trigger: FlushTrigger,
    ) -> Result<Option<FlushReport>> {
        let turn = self.turns.acquire(key).await;
        let state = self
            .store
            .load(key)
            .await
            .map_err(|e| BatchError::store(key, e))?
            .unwrap_or_default();
        if state.is_empty() {
            return Ok(None);
        }
        self.flusher.flush(&turn, state, trigger).await.map(Some)
    }
}
