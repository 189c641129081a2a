//! Pipeline orchestrator - feeds input lines through the batching engine.
//!
//! Every key gets its own worker task fed by a bounded channel, so one key's
//! items reach the engine in input order while different keys proceed
//! concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use batcher::{BatchEngine, BatchError, ConfiguredStore};
use contracts::{AppConfig, BatchKey, Item};
use dispatcher::ConfiguredSink;
use observability::BatchMetricsAggregator;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::input;
use super::PipelineStats;
use crate::error::CliError;

type Engine = BatchEngine<ConfiguredStore, ConfiguredSink>;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Loaded and validated configuration
    pub app: AppConfig,

    /// Input file (None = stdin)
    pub input: Option<PathBuf>,

    /// Stop reading after this long (None = until EOF)
    pub timeout: Option<Duration>,

    /// Per-key channel capacity
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

/// What the input reader saw
#[derive(Debug, Default)]
struct FeedStats {
    lines_read: u64,
    malformed_lines: u64,
    keys: usize,
    interrupted: bool,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the input ends or `shutdown` resolves, then drain.
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let app = &self.config.app;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let store = ConfiguredStore::open(&app.store)
            .await
            .context("Failed to open key state store")?;
        info!(kind = ?store.kind(), "Key state store opened");

        let dispatcher = dispatcher::create_dispatcher(&app.sink, &app.dispatch)
            .await
            .context("Failed to create dispatcher")?;

        let engine = Arc::new(BatchEngine::start(app.batcher.clone(), store, dispatcher));

        // Batches left open by a previous run of a durable store go out now
        // rather than waiting for their re-armed timers.
        let leftover = engine.drain().await.context("Failed to drain leftover batches")?;
        if !leftover.flushed.is_empty() {
            info!(
                batches = leftover.flushed.len(),
                items = leftover.items_flushed(),
                "Delivered batches left by previous run"
            );
        }
        for batch in leftover.undelivered {
            engine.hold_undelivered(batch).await;
        }

        let reader = input::open(self.config.input.as_deref())
            .await
            .context("Failed to open input")?;

        let batches = Arc::new(Mutex::new(BatchMetricsAggregator::new()));
        let receive_errors = Arc::new(AtomicU64::new(0));

        let deadline = self.config.timeout;
        let stop = async move {
            tokio::select! {
                _ = shutdown => warn!("Received shutdown signal, stopping input"),
                _ = sleep_or_forever(deadline) => warn!("Input timeout reached"),
            }
        };

        let mut workers = JoinSet::new();
        let fed = feed(
            reader,
            stop,
            self.config.buffer_size,
            |key, rx| {
                workers.spawn(key_worker(
                    Arc::clone(&engine),
                    key,
                    rx,
                    Arc::clone(&batches),
                    Arc::clone(&receive_errors),
                ));
            },
        )
        .await?;

        // Senders are gone; workers finish their queues and exit.
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Key worker panicked");
            }
        }

        info!("Input finished, draining open batches...");
        let timer = engine.timer_stats();
        let dispatcher = Arc::clone(engine.dispatcher());
        let drained = match Arc::try_unwrap(engine) {
            Ok(engine) => engine.shutdown().await,
            Err(engine) => engine.drain().await,
        }
        .map_err(|e| CliError::pipeline(e.to_string()))?;

        let mut batches = Arc::try_unwrap(batches)
            .map(Mutex::into_inner)
            .unwrap_or_default();
        for report in &drained.flushed {
            batches.record_flush(report.trigger, report.size);
        }
        for batch in &drained.undelivered {
            batches.record_dispatch_failure();
            error!(
                key = %batch.key(),
                generation = batch.generation(),
                items = batch.len(),
                "Batch closed but never delivered"
            );
        }
        for _ in 0..timer.stale {
            batches.record_stale();
        }

        let stats = PipelineStats {
            lines_read: fed.lines_read,
            malformed_lines: fed.malformed_lines,
            keys: fed.keys,
            receive_errors: receive_errors.load(Ordering::Relaxed),
            interrupted: fed.interrupted,
            duration: start_time.elapsed(),
            batches,
            timer,
            dispatch: dispatcher.snapshot(),
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            items = stats.batches.total_items,
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

/// Read lines until EOF or `stop`, routing each item to its key's worker.
async fn feed<R, S, F>(
    reader: R,
    stop: S,
    buffer_size: usize,
    mut spawn_worker: F,
) -> Result<FeedStats>
where
    R: tokio::io::AsyncBufRead + Unpin,
    S: Future<Output = ()>,
    F: FnMut(BatchKey, mpsc::Receiver<Item>),
{
    let mut stats = FeedStats::default();
    let mut routes: HashMap<BatchKey, mpsc::Sender<Item>> = HashMap::new();
    let mut lines = reader.lines();
    let mut stop = std::pin::pin!(stop);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.map_err(CliError::from)?,
            _ = &mut stop => {
                stats.interrupted = true;
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        stats.lines_read += 1;

        let (key, item) = match input::parse_line(stats.lines_read, &line) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => continue,
            Err(e) => {
                stats.malformed_lines += 1;
                warn!(error = %e, "Skipping input line");
                continue;
            }
        };

        let tx = routes.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(buffer_size);
            spawn_worker(key.clone(), rx);
            tx
        });
        if tx.send(item).await.is_err() {
            warn!(key = %key, "Key worker stopped, dropping item");
        }
    }

    stats.keys = routes.len();
    debug!(lines = stats.lines_read, keys = stats.keys, "Input closed");
    Ok(stats)
}

/// Feed one key's items to the engine in order.
async fn key_worker(
    engine: Arc<Engine>,
    key: BatchKey,
    mut rx: mpsc::Receiver<Item>,
    batches: Arc<Mutex<BatchMetricsAggregator>>,
    receive_errors: Arc<AtomicU64>,
) {
    while let Some(item) = rx.recv().await {
        match engine.receive(key.clone(), item).await {
            Ok(outcome) => {
                let mut batches = batches.lock().await;
                batches.record_item();
                if let Some(report) = outcome.flush_report() {
                    batches.record_flush(report.trigger, report.size);
                }
            }
            Err(BatchError::DispatchFailed { batch, source }) => {
                warn!(
                    key = %key,
                    generation = batch.generation(),
                    error = %source,
                    "Batch rejected, retrying once"
                );
                batches.lock().await.record_item();
                if let Err(e) = engine.redispatch(&batch).await {
                    warn!(key = %key, error = %e, "Batch rejected again, holding it");
                    engine.hold_undelivered(batch).await;
                }
            }
            Err(e) => {
                receive_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Item not accepted");
            }
        }
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
