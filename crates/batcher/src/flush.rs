//! The one place a batch is closed.
//!
//! Both triggers end here, holding the key's turn: the size trigger from
//! `BatchAccumulator::receive` and the timer trigger from
//! `FlushCoordinator::on_timer_fire`.

use std::sync::Arc;

use contracts::{BatchKey, BatchSink, BatchState, FlushTrigger, KeyStateStore};
use dispatcher::{DispatchReport, Dispatcher};
use tracing::{debug, info};

use crate::error::{BatchError, Result};
use crate::turns::Turn;

/// A batch that was closed and accepted by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub key: BatchKey,
    /// Generation the batch was closed under
    pub generation: u64,
    pub size: usize,
    pub trigger: FlushTrigger,
    pub dispatch: DispatchReport,
}

pub(crate) struct Flusher<S, K> {
    store: Arc<S>,
    dispatcher: Arc<Dispatcher<K>>,
}

impl<S, K> Clone for Flusher<S, K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S, K> Flusher<S, K>
where
    S: KeyStateStore + Sync,
    K: BatchSink,
{
    pub(crate) fn new(store: Arc<S>, dispatcher: Arc<Dispatcher<K>>) -> Self {
        Self { store, dispatcher }
    }

    /// Close `state`'s open generation and deliver it.
    ///
    /// `state` is the key's state as loaded under `turn`. The closed state
    /// (next generation, no items) is saved in one write before dispatch; if
    /// that write fails nothing has changed. A dispatch failure after the
    /// save hands the captured batch back in `BatchError::DispatchFailed`.
    pub(crate) async fn flush(
        &self,
        turn: &Turn,
        mut state: BatchState,
        trigger: FlushTrigger,
    ) -> Result<FlushReport> {
        let key = turn.key();
        let batch = state.close(key);

        self.store
            .save(key, &state)
            .await
            .map_err(|e| BatchError::store(key, e))?;

        observability::record_flush(trigger, batch.len(), batch.generation());
        debug!(
            key = %key,
            generation = batch.generation(),
            next_generation = state.generation,
            trigger = %trigger,
            "Batch closed"
        );

        // Still inside the turn: a key's batches reach the sink in generation order.
        let dispatch = match self.dispatcher.dispatch(&batch).await {
            Ok(report) => report,
            Err(source) => return Err(BatchError::DispatchFailed { batch, source }),
        };

        info!(
            key = %key,
            generation = batch.generation(),
            size = batch.len(),
            trigger = %trigger,
            attempts = dispatch.attempts,
            "Batch flushed"
        );

        Ok(FlushReport {
            key: key.clone(),
            generation: batch.generation(),
            size: batch.len(),
            trigger,
            dispatch,
        })
    }
}
