//! BatchAccumulator - appends items and fires the size trigger

use std::sync::Arc;

use contracts::{
    BatchKey, BatchSink, BatcherConfig, BatchState, ContractError, FlushRequest, FlushTrigger,
    Item, KeyStateStore, TimerService,
};
use dispatcher::Dispatcher;
use tracing::{debug, instrument, warn};

use crate::error::{BatchError, Result};
use crate::flush::{FlushReport, Flusher};
use crate::turns::{KeyTurns, Turn};

/// What `receive` did with an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Appended to an open batch that already had a timer
    Buffered { generation: u64, len: usize },
    /// First item of a new batch; its wait timer is armed
    Opened { generation: u64 },
    /// The item closed the batch, by size or because no timer could be armed
    Flushed(FlushReport),
}

impl ReceiveOutcome {
    /// Generation the item was appended to.
    pub fn generation(&self) -> u64 {
        match self {
            ReceiveOutcome::Buffered { generation, .. } | ReceiveOutcome::Opened { generation } => {
                *generation
            }
            ReceiveOutcome::Flushed(report) => report.generation,
        }
    }

    pub fn flush_report(&self) -> Option<&FlushReport> {
        match self {
            ReceiveOutcome::Flushed(report) => Some(report),
            _ => None,
        }
    }
}

/// Accepts items per key.
///
/// Each key's read-append-write runs inside that key's turn, so concurrent
/// `receive` calls for one key apply one at a time and none is lost. Keys
/// never wait on each other.
pub struct BatchAccumulator<S, T, K> {
    config: BatcherConfig,
    turns: Arc<KeyTurns>,
    store: Arc<S>,
    timer: Arc<T>,
    flusher: Flusher<S, K>,
}

impl<S, T, K> BatchAccumulator<S, T, K>
where
    S: KeyStateStore + Sync,
    T: TimerService + Sync,
    K: BatchSink,
{
    pub fn new(
        config: BatcherConfig,
        turns: Arc<KeyTurns>,
        store: Arc<S>,
        timer: Arc<T>,
        dispatcher: Arc<Dispatcher<K>>,
    ) -> Self {
        Self {
            config,
            turns,
            flusher: Flusher::new(Arc::clone(&store), dispatcher),
            store,
            timer,
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Append `item` to the open batch of `key`.
    ///
    /// - the first item of a generation arms a timer for that generation
    /// - the item that brings the batch to `max_batch_size` closes and
    ///   dispatches it before returning
    ///
    /// On `StoreUnavailable` the item was not added.
    #[instrument(name = "accumulator_receive", skip(self, item), fields(key = %key, bytes = item.len()))]
    pub async fn receive(&self, key: BatchKey, item: Item) -> Result<ReceiveOutcome> {
        if key.is_blank() {
            return Err(BatchError::InvalidKey);
        }

        let turn = self.turns.acquire(&key).await;

        let mut state = self
            .store
            .load(&key)
            .await
            .map_err(|e| BatchError::store(&key, e))?
            .unwrap_or_default();
        let len = state.push(item);

        if len >= self.config.max_batch_size {
            let flushed = self.flusher.flush(&turn, state, FlushTrigger::Size).await;
            if !matches!(flushed, Err(BatchError::StoreUnavailable { .. })) {
                observability::record_item_received();
            }
            return flushed.map(ReceiveOutcome::Flushed);
        }

        self.store
            .save(&key, &state)
            .await
            .map_err(|e| BatchError::store(&key, e))?;
        observability::record_item_received();

        if len == 1 {
            return self.open(&turn, state).await;
        }

        debug!(generation = state.generation, len, "Item buffered");
        Ok(ReceiveOutcome::Buffered {
            generation: state.generation,
            len,
        })
    }

    /// Arm the wait timer for a batch that just got its first item.
    ///
    /// The item is already stored. If the timer service keeps refusing, the
    /// batch is closed right away so it can never be left without a trigger.
    async fn open(&self, turn: &Turn, state: BatchState) -> Result<ReceiveOutcome> {
        let request = FlushRequest::new(turn.key().clone(), state.generation);

        let refused = match self.schedule(&request).await {
            Ok(()) => {
                observability::record_batch_opened();
                debug!(generation = request.generation, "Batch opened");
                return Ok(ReceiveOutcome::Opened {
                    generation: request.generation,
                });
            }
            Err(e) => e,
        };

        warn!(
            request = %request,
            error = %refused,
            "Flush timer unavailable, closing batch immediately"
        );
        match self
            .flusher
            .flush(turn, state, FlushTrigger::TimerFallback)
            .await
        {
            Ok(report) => Ok(ReceiveOutcome::Flushed(report)),
            Err(BatchError::StoreUnavailable { .. }) => Err(BatchError::TimerScheduling {
                key: request.key.to_string(),
                generation: request.generation,
                source: refused,
            }),
            Err(other) => Err(other),
        }
    }

    async fn schedule(&self, request: &FlushRequest) -> std::result::Result<(), ContractError> {
        let attempts = self.config.schedule_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .timer
                .schedule(request.clone(), self.config.max_wait())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    observability::record_timer_schedule_failure();
                    if attempt >= attempts {
                        return Err(e);
                    }
                    debug!(request = %request, attempt, error = %e, "Timer schedule failed, retrying");
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::TimerOutcome;
    use crate::testing::{harness, FailingStore, Harness, ManualTimer, RecordingSink};

    fn items(values: &[&'static str]) -> Vec<Item> {
        values.iter().map(|v| Item::from(*v)).collect()
    }

    #[tokio::test]
    async fn test_size_trigger_closes_batch() {
        let Harness {
            accumulator,
            coordinator,
            store,
            timer,
            sink,
            ..
        } = harness(3, 1000);
        let key: BatchKey = "k".into();

        let first = accumulator.receive(key.clone(), "a".into()).await.unwrap();
        assert_eq!(first, ReceiveOutcome::Opened { generation: 0 });
        assert_eq!(timer.scheduled(), vec![FlushRequest::new(key.clone(), 0)]);

        let second = accumulator.receive(key.clone(), "b".into()).await.unwrap();
        assert_eq!(
            second,
            ReceiveOutcome::Buffered {
                generation: 0,
                len: 2
            }
        );

        let third = accumulator.receive(key.clone(), "c".into()).await.unwrap();
        let report = third.flush_report().unwrap();
        assert_eq!(report.generation, 0);
        assert_eq!(report.size, 3);
        assert_eq!(report.trigger, FlushTrigger::Size);

        let stored = store.load(&key).await.unwrap().unwrap();
        assert_eq!(stored.generation, 1);
        assert!(stored.is_empty());

        // The generation-0 timer fires late and must not flush again.
        let fired = coordinator.on_timer_fire(&key, 0).await.unwrap();
        assert_eq!(fired, TimerOutcome::Stale);

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].items(), items(&["a", "b", "c"]).as_slice());
        // Only the first item of a generation arms a timer.
        assert_eq!(timer.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_size_one_never_buffers() {
        let h = harness(1, 1000);
        let key: BatchKey = "solo".into();

        for generation in 0..3 {
            let outcome = h.accumulator.receive(key.clone(), "x".into()).await.unwrap();
            let report = outcome.flush_report().unwrap();
            assert_eq!(report.generation, generation);
            assert_eq!(report.size, 1);
        }
        assert!(h.timer.scheduled().is_empty());
        assert_eq!(h.sink.batches().len(), 3);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let h = harness(2, 1000);

        h.accumulator.receive("a".into(), "1".into()).await.unwrap();
        h.accumulator.receive("b".into(), "1".into()).await.unwrap();
        let outcome = h.accumulator.receive("a".into(), "2".into()).await.unwrap();

        assert_eq!(outcome.flush_report().unwrap().key, "a");
        let b = h.store.load(&"b".into()).await.unwrap().unwrap();
        assert_eq!(b.generation, 0);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_key_rejected() {
        let h = harness(3, 1000);
        let err = h.accumulator.receive("  ".into(), "x".into()).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidKey));
        assert!(h.timer.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_timer_refusal_falls_back_to_immediate_flush() {
        let h = harness(3, 1000);
        h.timer.refuse_next(u32::MAX);

        let outcome = h.accumulator.receive("k".into(), "x".into()).await.unwrap();

        let report = outcome.flush_report().unwrap();
        assert_eq!(report.trigger, FlushTrigger::TimerFallback);
        assert_eq!(report.size, 1);
        assert_eq!(h.sink.batches()[0].items(), items(&["x"]).as_slice());

        let stored = h.store.load(&"k".into()).await.unwrap().unwrap();
        assert_eq!(stored.generation, 1);
    }

    #[tokio::test]
    async fn test_timer_refusal_retried_before_fallback() {
        let h = harness(3, 1000);
        h.timer.refuse_next(1);

        let outcome = h.accumulator.receive("k".into(), "x".into()).await.unwrap();

        assert_eq!(outcome, ReceiveOutcome::Opened { generation: 0 });
        assert!(h.sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_commits_nothing() {
        let store = Arc::new(FailingStore::default());
        let timer = Arc::new(ManualTimer::default());
        let sink = RecordingSink::default();
        let dispatcher = Arc::new(Dispatcher::with_policy(
            sink.clone(),
            dispatcher::RetryPolicy::no_retry(),
        ));
        let accumulator = BatchAccumulator::new(
            BatcherConfig::new(2, 1000),
            Arc::new(KeyTurns::new()),
            Arc::clone(&store),
            Arc::clone(&timer),
            dispatcher,
        );
        let key: BatchKey = "k".into();

        accumulator.receive(key.clone(), "a".into()).await.unwrap();

        store.fail_saves(true);
        let err = accumulator.receive(key.clone(), "b".into()).await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(sink.batches().is_empty());

        store.fail_saves(false);
        let stored = store.load(&key).await.unwrap().unwrap();
        assert_eq!(stored.generation, 0);
        assert_eq!(stored.items, items(&["a"]));
    }

    #[tokio::test]
    async fn test_dispatch_failure_returns_captured_batch() {
        let h = harness(2, 1000);
        let key: BatchKey = "k".into();
        h.sink.fail_next(1);

        h.accumulator.receive(key.clone(), "a".into()).await.unwrap();
        let err = h.accumulator.receive(key.clone(), "b".into()).await.unwrap_err();
        let batch = err.undelivered_batch().cloned().unwrap();
        assert_eq!(batch.generation(), 0);

        // The key moved on before the retry.
        h.accumulator.receive(key.clone(), "c".into()).await.unwrap();

        h.dispatcher.dispatch(&batch).await.unwrap();
        let delivered = h.sink.batches();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].generation(), 0);
        assert_eq!(delivered[0].items(), items(&["a", "b"]).as_slice());
    }

    #[tokio::test]
    async fn test_concurrent_receives_on_one_key() {
        let h = harness(4, 60_000);
        let accumulator = Arc::new(h.accumulator);
        let key: BatchKey = "hot".into();

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let accumulator = Arc::clone(&accumulator);
                let key = key.clone();
                tokio::spawn(async move { accumulator.receive(key, Item::from(i.to_string())).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let batches = h.sink.batches();
        assert_eq!(batches.len(), 10);
        for (expected, batch) in batches.iter().enumerate() {
            assert_eq!(batch.generation(), expected as u64);
            assert_eq!(batch.len(), 4);
        }
        let mut seen: Vec<String> = batches
            .iter()
            .flat_map(|b| b.items().iter().map(|i| i.as_text().unwrap().to_string()))
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 40);
    }
}
