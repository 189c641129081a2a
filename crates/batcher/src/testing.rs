//! Test doubles shared by the unit tests

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{
    Batch, BatchKey, BatchSink, BatchState, BatcherConfig, ContractError, FlushRequest,
    KeyStateStore, TimerService,
};
use dispatcher::{Dispatcher, RetryPolicy};

use crate::store::MemoryStateStore;
use crate::turns::KeyTurns;
use crate::{BatchAccumulator, FlushCoordinator};

/// Records requests instead of sleeping; tests fire them by hand.
#[derive(Default)]
pub struct ManualTimer {
    scheduled: Mutex<Vec<FlushRequest>>,
    refuse: AtomicU32,
}

impl ManualTimer {
    pub fn scheduled(&self) -> Vec<FlushRequest> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn refuse_next(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

impl TimerService for ManualTimer {
    async fn schedule(&self, request: FlushRequest, _delay: Duration) -> Result<(), ContractError> {
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ContractError::timer_rejected(&request, "refused"));
        }
        self.scheduled.lock().unwrap().push(request);
        Ok(())
    }
}

/// Keeps every delivered batch; can be told to reject the next N writes.
#[derive(Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<Batch>>>,
    fail_next: Arc<AtomicU32>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl BatchSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ContractError::sink_write("recording", "rejected"));
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory store whose saves can be switched off.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStateStore,
    fail_saves: AtomicBool,
}

impl FailingStore {
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl KeyStateStore for FailingStore {
    async fn load(&self, key: &BatchKey) -> Result<Option<BatchState>, ContractError> {
        self.inner.load(key).await
    }

    async fn generation(&self, key: &BatchKey) -> Result<u64, ContractError> {
        self.inner.generation(key).await
    }

    async fn save(&self, key: &BatchKey, state: &BatchState) -> Result<(), ContractError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ContractError::store_write(key.as_str(), "disk full"));
        }
        self.inner.save(key, state).await
    }

    async fn keys(&self) -> Result<Vec<BatchKey>, ContractError> {
        self.inner.keys().await
    }
}

pub struct Harness {
    pub accumulator: BatchAccumulator<MemoryStateStore, ManualTimer, RecordingSink>,
    pub coordinator: FlushCoordinator<MemoryStateStore, RecordingSink>,
    pub dispatcher: Arc<Dispatcher<RecordingSink>>,
    pub store: Arc<MemoryStateStore>,
    pub timer: Arc<ManualTimer>,
    pub turns: Arc<KeyTurns>,
    pub sink: RecordingSink,
}

/// Accumulator and coordinator sharing one store, with a manual timer and
/// a dispatcher that does not retry.
pub fn harness(max_batch_size: usize, max_wait_ms: u64) -> Harness {
    let store = Arc::new(MemoryStateStore::new());
    let timer = Arc::new(ManualTimer::default());
    let turns = Arc::new(KeyTurns::new());
    let sink = RecordingSink::default();
    let dispatcher = Arc::new(Dispatcher::with_policy(sink.clone(), RetryPolicy::no_retry()));

    Harness {
        accumulator: BatchAccumulator::new(
            BatcherConfig::new(max_batch_size, max_wait_ms),
            Arc::clone(&turns),
            Arc::clone(&store),
            Arc::clone(&timer),
            Arc::clone(&dispatcher),
        ),
        coordinator: FlushCoordinator::new(
            Arc::clone(&turns),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
        ),
        dispatcher,
        store,
        timer,
        turns,
        sink,
    }
}
