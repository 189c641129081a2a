//! Dispatcher - hands closed batches to the downstream sink

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use contracts::{Batch, BatchSink, DispatchConfig, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::retry::RetryPolicy;
use crate::sinks::{ConfiguredSink, FileSink, LogSink, NetworkSink};

/// Result of a successful dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Writes it took, 1 when the first one succeeded
    pub attempts: u32,
    /// Time from the first attempt to the accepted write
    pub elapsed: Duration,
}

/// Delivers batches to one sink with bounded retry.
///
/// `dispatch` takes the batch by reference and never rebuilds it: a caller
/// holding a batch from a failed dispatch retries with that same value,
/// whatever has happened to the key since.
pub struct Dispatcher<K> {
    name: String,
    sink: Mutex<K>,
    retry: RetryPolicy,
    metrics: Arc<DispatchMetrics>,
}

impl<K: BatchSink> Dispatcher<K> {
    pub fn new(sink: K, config: &DispatchConfig) -> Self {
        Self::with_policy(sink, RetryPolicy::from_config(config))
    }

    pub fn with_policy(sink: K, retry: RetryPolicy) -> Self {
        Self {
            name: sink.name().to_string(),
            sink: Mutex::new(sink),
            retry,
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Deliver `batch`, retrying the same batch on failure.
    ///
    /// The sink lock is released between attempts so other keys can
    /// dispatch while this one backs off.
    #[instrument(
        name = "dispatcher_dispatch",
        skip(self, batch),
        fields(sink = %self.name, key = %batch.key(), generation = batch.generation(), items = batch.len())
    )]
    pub async fn dispatch(&self, batch: &Batch) -> Result<DispatchReport, DispatcherError> {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let result = self.sink.lock().await.write(batch).await;

            match result {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    self.metrics.record_delivered(batch.len());
                    observability::record_batch_dispatched(&self.name, true, batch.len());
                    observability::record_dispatch_latency_ms(elapsed.as_secs_f64() * 1000.0);
                    debug!(attempts = attempt, "Batch delivered");
                    return Ok(DispatchReport {
                        attempts: attempt,
                        elapsed,
                    });
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Sink write failed, retrying same batch"
                    );
                    self.metrics.inc_retry_count();
                    observability::record_dispatch_retry(&self.name);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.metrics.inc_failure_count();
                    observability::record_batch_dispatched(&self.name, false, batch.len());
                    error!(attempts = attempt, error = %e, "Sink rejected batch");
                    return Err(DispatcherError::Rejected {
                        sink_name: self.name.clone(),
                        key: batch.key().to_string(),
                        generation: batch.generation(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Flush the sink's buffers
    pub async fn flush(&self) -> Result<(), DispatcherError> {
        self.sink.lock().await.flush().await?;
        Ok(())
    }

    /// Flush and close the sink
    #[instrument(name = "dispatcher_close", skip(self), fields(sink = %self.name))]
    pub async fn close(&self) -> Result<(), DispatcherError> {
        let mut sink = self.sink.lock().await;
        sink.flush().await?;
        sink.close().await?;
        info!(
            batches = self.metrics.batch_count(),
            items = self.metrics.item_count(),
            failures = self.metrics.failure_count(),
            "Dispatcher closed"
        );
        Ok(())
    }
}

/// Create a sink from configuration
#[instrument(
    name = "dispatcher_create_sink",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
pub async fn create_sink(config: &SinkConfig) -> Result<ConfiguredSink, DispatcherError> {
    match config.sink_type {
        SinkType::Log => Ok(ConfiguredSink::Log(LogSink::new(&config.name))),
        SinkType::File => FileSink::from_params(&config.name, &config.params)
            .map(ConfiguredSink::File)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string())),
        SinkType::Network => NetworkSink::from_params(&config.name, &config.params)
            .await
            .map(ConfiguredSink::Network)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string())),
    }
}

/// Convenience function to create a dispatcher from configuration
pub async fn create_dispatcher(
    sink_config: &SinkConfig,
    dispatch_config: &DispatchConfig,
) -> Result<Dispatcher<ConfiguredSink>, DispatcherError> {
    let sink = create_sink(sink_config).await?;
    Ok(Dispatcher::new(sink, dispatch_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractError, Item};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Sink that fails its first `fail_first` writes
    struct FlakySink {
        fail_first: u32,
        calls: Arc<AtomicU32>,
        delivered: Arc<std::sync::Mutex<Vec<Batch>>>,
    }

    impl FlakySink {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                calls: Arc::new(AtomicU32::new(0)),
                delivered: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    impl BatchSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ContractError::sink_write("flaky", "mock failure"));
            }
            self.delivered.lock().unwrap().push(batch.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn batch() -> Batch {
        Batch::new("k".into(), 0, vec![Item::from("a"), Item::from("b")])
    }

    #[tokio::test]
    async fn test_dispatch_first_try() {
        let sink = FlakySink::new(0);
        let delivered = Arc::clone(&sink.delivered);
        let dispatcher = Dispatcher::with_policy(sink, policy(3));

        let report = dispatcher.dispatch(&batch()).await.unwrap();

        assert_eq!(report.attempts, 1);
        assert_eq!(delivered.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.snapshot().item_count, 2);
    }

    #[tokio::test]
    async fn test_dispatch_retries_same_batch() {
        let sink = FlakySink::new(2);
        let delivered = Arc::clone(&sink.delivered);
        let dispatcher = Dispatcher::with_policy(sink, policy(3));

        let report = dispatcher.dispatch(&batch()).await.unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(dispatcher.snapshot().retry_count, 2);
        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.as_slice(), &[batch()]);
    }

    #[tokio::test]
    async fn test_dispatch_gives_up_after_budget() {
        let sink = FlakySink::new(10);
        let calls = Arc::clone(&sink.calls);
        let dispatcher = Dispatcher::with_policy(sink, policy(2));

        let err = dispatcher.dispatch(&batch()).await.unwrap_err();

        match err {
            DispatcherError::Rejected {
                attempts,
                generation,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(generation, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_caller_retry_after_rejection() {
        let sink = FlakySink::new(1);
        let delivered = Arc::clone(&sink.delivered);
        let dispatcher = Dispatcher::with_policy(sink, RetryPolicy::no_retry());

        let captured = batch();
        assert!(dispatcher.dispatch(&captured).await.is_err());
        dispatcher.dispatch(&captured).await.unwrap();

        assert_eq!(delivered.lock().unwrap()[0].items(), captured.items());
    }

    #[tokio::test]
    async fn test_create_dispatcher_from_config() {
        let config = SinkConfig {
            name: "test_log".to_string(),
            sink_type: SinkType::Log,
            params: HashMap::new(),
        };

        let dispatcher = create_dispatcher(&config, &DispatchConfig::default())
            .await
            .unwrap();
        assert_eq!(dispatcher.name(), "test_log");

        dispatcher.dispatch(&batch()).await.unwrap();
        dispatcher.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_file_sink_without_path_fails() {
        let config = SinkConfig {
            name: "file".to_string(),
            sink_type: SinkType::File,
            params: HashMap::new(),
        };
        let err = create_sink(&config).await.unwrap_err();
        assert!(matches!(err, DispatcherError::SinkCreation { .. }));
    }
}
