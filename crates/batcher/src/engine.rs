//! BatchEngine - wires accumulator, coordinator and a tokio timer together

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    Batch, BatchKey, BatchSink, BatcherConfig, FlushRequest, FlushTrigger, Item, KeyStateStore,
    TimerService,
};
use dispatcher::{DispatchReport, Dispatcher};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::accumulator::{BatchAccumulator, ReceiveOutcome};
use crate::coordinator::{FlushCoordinator, TimerOutcome};
use crate::error::{BatchError, Result};
use crate::flush::FlushReport;
use crate::timer::TokioTimer;
use crate::turns::KeyTurns;

/// Counters for timer fires handled by the engine's timer loop.
#[derive(Debug, Default)]
pub struct TimerStats {
    fired: AtomicU64,
    flushed: AtomicU64,
    stale: AtomicU64,
    empty: AtomicU64,
    redelivered: AtomicU64,
    undelivered: AtomicU64,
    rescheduled: AtomicU64,
    rearmed: AtomicU64,
}

/// Point-in-time copy of `TimerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStatsSnapshot {
    pub fired: u64,
    pub flushed: u64,
    pub stale: u64,
    pub empty: u64,
    /// Batches the timer path closed and delivered on its extra attempt
    pub redelivered: u64,
    /// Batches the timer path closed and could not deliver
    pub undelivered: u64,
    /// Fires put back on the timer because the store was unavailable
    pub rescheduled: u64,
    /// Timers armed at start for batches already open in the store
    pub rearmed: u64,
}

impl TimerStats {
    pub fn snapshot(&self) -> TimerStatsSnapshot {
        TimerStatsSnapshot {
            fired: self.fired.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            rearmed: self.rearmed.load(Ordering::Relaxed),
        }
    }
}

/// Result of draining every open batch.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub flushed: Vec<FlushReport>,
    /// Closed but rejected by the sink, whether by this drain, the timer
    /// path or a caller's `hold_undelivered`. Hand back to `redispatch`.
    pub undelivered: Vec<Batch>,
}

impl DrainReport {
    pub fn items_flushed(&self) -> usize {
        self.flushed.iter().map(|r| r.size).sum()
    }
}

/// A running batcher.
///
/// `start` spawns a timer loop that feeds due flush requests to the
/// coordinator, one task per fire. Before taking fires the loop arms a timer
/// for every batch already open in the store, so a restart on a durable
/// store keeps the wait bound. Must be started inside a tokio runtime.
pub struct BatchEngine<S, K> {
    accumulator: BatchAccumulator<S, TokioTimer, K>,
    coordinator: FlushCoordinator<S, K>,
    dispatcher: Arc<Dispatcher<K>>,
    store: Arc<S>,
    turns: Arc<KeyTurns>,
    timer: Arc<TokioTimer>,
    stats: Arc<TimerStats>,
    undelivered: Arc<Mutex<Vec<Batch>>>,
    timer_loop: JoinHandle<()>,
}

impl<S, K> BatchEngine<S, K>
where
    S: KeyStateStore + Send + Sync + 'static,
    K: BatchSink + Send + 'static,
{
    pub fn start(config: BatcherConfig, store: S, dispatcher: Dispatcher<K>) -> Self {
        let store = Arc::new(store);
        let dispatcher = Arc::new(dispatcher);
        let turns = Arc::new(KeyTurns::new());
        let (timer, fired) = TokioTimer::new();
        let timer = Arc::new(timer);
        let stats = Arc::new(TimerStats::default());
        let undelivered = Arc::new(Mutex::new(Vec::new()));

        let coordinator =
            FlushCoordinator::new(Arc::clone(&turns), Arc::clone(&store), Arc::clone(&dispatcher));
        let accumulator = BatchAccumulator::new(
            config.clone(),
            Arc::clone(&turns),
            Arc::clone(&store),
            Arc::clone(&timer),
            Arc::clone(&dispatcher),
        );

        let timer_loop = tokio::spawn(run_timer_loop(
            TimerLoop {
                coordinator: coordinator.clone(),
                dispatcher: Arc::clone(&dispatcher),
                store: Arc::clone(&store),
                timer: Arc::clone(&timer),
                stats: Arc::clone(&stats),
                undelivered: Arc::clone(&undelivered),
                max_wait: config.max_wait(),
            },
            fired,
        ));

        info!(
            max_batch_size = config.max_batch_size,
            max_wait_ms = config.max_wait_ms,
            sink = dispatcher.name(),
            "Batch engine started"
        );

        Self {
            accumulator,
            coordinator,
            dispatcher,
            store,
            turns,
            timer,
            stats,
            undelivered,
            timer_loop,
        }
    }

    /// See `BatchAccumulator::receive`.
    pub async fn receive(&self, key: BatchKey, item: Item) -> Result<ReceiveOutcome> {
        self.accumulator.receive(key, item).await
    }

    /// See `FlushCoordinator::on_timer_fire`. The timer loop calls this
    /// itself; exposed for callers driving fires from elsewhere.
    pub async fn on_timer_fire(&self, key: &BatchKey, generation: u64) -> Result<TimerOutcome> {
        self.coordinator.on_timer_fire(key, generation).await
    }

    /// Deliver a batch captured from `BatchError::DispatchFailed` again.
    pub async fn redispatch(&self, batch: &Batch) -> Result<DispatchReport> {
        self.dispatcher
            .dispatch(batch)
            .await
            .map_err(|source| BatchError::DispatchFailed {
                batch: batch.clone(),
                source,
            })
    }

    /// Keep a batch the sink rejected so the next `drain` reports it.
    pub async fn hold_undelivered(&self, batch: Batch) {
        self.undelivered.lock().await.push(batch);
    }

    /// Close and deliver every key's open batch.
    ///
    /// Keys whose batch the sink rejects are reported, not retried, and do
    /// not stop the drain. A store failure does. Batches held from earlier
    /// rejections are handed over in the report too.
    #[instrument(name = "engine_drain", skip(self))]
    pub async fn drain(&self) -> Result<DrainReport> {
        let keys = self
            .store
            .keys()
            .await
            .map_err(|e| BatchError::store(&BatchKey::from("*"), e))?;

        let mut report = DrainReport {
            undelivered: std::mem::take(&mut *self.undelivered.lock().await),
            ..DrainReport::default()
        };
        for key in keys {
            match self.coordinator.flush_open(&key, FlushTrigger::Drain).await {
                Ok(Some(flushed)) => report.flushed.push(flushed),
                Ok(None) => {}
                Err(BatchError::DispatchFailed { batch, source }) => {
                    error!(key = %key, generation = batch.generation(), error = %source, "Drained batch not delivered");
                    report.undelivered.push(batch);
                }
                Err(e) => return Err(e),
            }
        }

        let pruned = self.turns.prune().await;
        info!(
            batches = report.flushed.len(),
            items = report.items_flushed(),
            undelivered = report.undelivered.len(),
            pruned,
            "Drain complete"
        );
        Ok(report)
    }

    /// Drain, stop the timer loop and close the sink.
    ///
    /// Callers must stop calling `receive` first; items arriving during the
    /// drain may be left in the store.
    pub async fn shutdown(self) -> Result<DrainReport> {
        let report = self.drain().await?;
        self.timer_loop.abort();
        self.dispatcher.close().await.map_err(BatchError::Sink)?;
        info!(
            pending_timers = self.timer.pending(),
            timer = ?self.stats.snapshot(),
            "Batch engine stopped"
        );
        Ok(report)
    }

    pub fn accumulator(&self) -> &BatchAccumulator<S, TokioTimer, K> {
        &self.accumulator
    }

    pub fn coordinator(&self) -> &FlushCoordinator<S, K> {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<K>> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn timer_stats(&self) -> TimerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Timers armed and not yet due.
    pub fn pending_timers(&self) -> usize {
        self.timer.pending()
    }
}

struct TimerLoop<S, K> {
    coordinator: FlushCoordinator<S, K>,
    dispatcher: Arc<Dispatcher<K>>,
    store: Arc<S>,
    timer: Arc<TokioTimer>,
    stats: Arc<TimerStats>,
    undelivered: Arc<Mutex<Vec<Batch>>>,
    max_wait: Duration,
}

impl<S, K> Clone for TimerLoop<S, K> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            store: Arc::clone(&self.store),
            timer: Arc::clone(&self.timer),
            stats: Arc::clone(&self.stats),
            undelivered: Arc::clone(&self.undelivered),
            max_wait: self.max_wait,
        }
    }
}

async fn run_timer_loop<S, K>(ctx: TimerLoop<S, K>, mut fired: mpsc::UnboundedReceiver<FlushRequest>)
where
    S: KeyStateStore + Send + Sync + 'static,
    K: BatchSink + Send + 'static,
{
    match ctx.rearm().await {
        Ok(0) => {}
        Ok(armed) => info!(armed, "Armed timers for batches left open"),
        Err(e) => error!(error = %e, "Could not arm timers for open batches"),
    }

    while let Some(request) = fired.recv().await {
        ctx.stats.fired.fetch_add(1, Ordering::Relaxed);
        let ctx = ctx.clone();
        // A slow sink on one key must not hold up fires for others.
        tokio::spawn(async move { ctx.handle(request).await });
    }
    debug!("Timer loop stopped");
}

impl<S, K> TimerLoop<S, K>
where
    S: KeyStateStore + Send + Sync + 'static,
    K: BatchSink + Send + 'static,
{
    /// Schedule a fire for every non-empty batch in the store.
    ///
    /// Reads without taking turns: a fire for a batch closed meanwhile is
    /// stale and ignored.
    async fn rearm(&self) -> Result<u64> {
        let keys = self
            .store
            .keys()
            .await
            .map_err(|e| BatchError::store(&BatchKey::from("*"), e))?;

        let mut armed = 0;
        for key in keys {
            let state = self
                .store
                .load(&key)
                .await
                .map_err(|e| BatchError::store(&key, e))?;
            let Some(state) = state.filter(|s| !s.is_empty()) else {
                continue;
            };

            let generation = state.generation;
            self.timer
                .schedule(FlushRequest::new(key.clone(), generation), self.max_wait)
                .await
                .map_err(|source| BatchError::TimerScheduling {
                    key: key.to_string(),
                    generation,
                    source,
                })?;
            debug!(key = %key, generation, items = state.len(), "Timer armed for open batch");
            armed += 1;
        }
        self.stats.rearmed.fetch_add(armed, Ordering::Relaxed);
        Ok(armed)
    }

    async fn handle(&self, request: FlushRequest) {
        let outcome = self
            .coordinator
            .on_timer_fire(&request.key, request.generation)
            .await;

        match outcome {
            Ok(TimerOutcome::Flushed(_)) => {
                self.stats.flushed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(TimerOutcome::Stale | TimerOutcome::StaleAfterRecheck) => {
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
            }
            Ok(TimerOutcome::Empty) => {
                self.stats.empty.fetch_add(1, Ordering::Relaxed);
            }
            Err(BatchError::DispatchFailed { batch, source }) => {
                warn!(request = %request, error = %source, "Timer flush not delivered, retrying batch");
                self.redeliver(batch).await;
            }
            Err(e) => {
                // The fire is still owed; a stale check on the next one is harmless.
                warn!(request = %request, error = %e, "Timer fire failed, rescheduling");
                self.stats.rescheduled.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.timer.schedule(request.clone(), self.max_wait).await {
                    error!(request = %request, error = %e, "Could not reschedule timer fire");
                }
            }
        }
    }

    async fn redeliver(&self, batch: Batch) {
        tokio::time::sleep(self.dispatcher.retry_policy().max_backoff).await;
        match self.dispatcher.dispatch(&batch).await {
            Ok(_) => {
                self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.undelivered.fetch_add(1, Ordering::Relaxed);
                error!(
                    key = %batch.key(),
                    generation = batch.generation(),
                    items = batch.len(),
                    error = %e,
                    "Batch not delivered, held for the next drain"
                );
                self.undelivered.lock().await.push(batch);
            }
        }
    }
}
