//! # Integration Tests
//!
//! End-to-end tests across crates.
//!
//! Covers:
//! - Contract snapshot tests
//! - Engine e2e tests against an in-memory sink
//! - Durable store and file sink round trips through configuration

#[cfg(test)]
mod support {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use batcher::{BatchEngine, MemoryStateStore};
    use contracts::{Batch, BatchSink, BatcherConfig, ContractError};
    use dispatcher::{Dispatcher, RetryPolicy};

    /// Collects delivered batches; rejects the next N writes on request.
    #[derive(Clone, Default)]
    pub struct MemorySink {
        batches: Arc<Mutex<Vec<Batch>>>,
        fail_next: Arc<AtomicU32>,
    }

    impl MemorySink {
        pub fn batches(&self) -> Vec<Batch> {
            self.batches.lock().unwrap().clone()
        }

        pub fn fail_next(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        /// Delivered batches of one key, in delivery order
        pub fn batches_for(&self, key: &str) -> Vec<Batch> {
            self.batches()
                .into_iter()
                .filter(|b| b.key() == key)
                .collect()
        }
    }

    impl BatchSink for MemorySink {
        fn name(&self) -> &str {
            "memory"
        }

        async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
            let rejected = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(ContractError::sink_write("memory", "injected failure"));
            }
            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    pub fn memory_engine(
        max_batch_size: usize,
        max_wait_ms: u64,
        retry: RetryPolicy,
    ) -> (BatchEngine<MemoryStateStore, MemorySink>, MemorySink) {
        let sink = MemorySink::default();
        let engine = BatchEngine::start(
            BatcherConfig::new(max_batch_size, max_wait_ms),
            MemoryStateStore::new(),
            Dispatcher::with_policy(sink.clone(), retry),
        );
        (engine, sink)
    }

    pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    pub fn texts(batch: &Batch) -> Vec<String> {
        batch
            .items()
            .iter()
            .map(|i| i.as_text().unwrap_or_default().to_string())
            .collect()
    }
}

#[cfg(test)]
mod contract_tests {
    use contracts::{Batch, BatchState, FlushRequest, FlushTrigger, Item};

    #[test]
    fn test_batch_wire_shape() {
        let batch = Batch::new("orders".into(), 3, vec![Item::from("a"), Item::from("b")]);
        let json = serde_json::to_string(&batch).unwrap();
        assert_eq!(json, r#"{"key":"orders","generation":3,"items":["a","b"]}"#);

        let back: Batch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn test_fresh_state_is_generation_zero() {
        let state = BatchState::default();
        assert_eq!(state.generation, 0);
        assert!(state.is_empty());
        assert!(state.is_current(0));
    }

    #[test]
    fn test_trigger_names() {
        let names: Vec<_> = [
            FlushTrigger::Size,
            FlushTrigger::Timer,
            FlushTrigger::TimerFallback,
            FlushTrigger::Drain,
        ]
        .iter()
        .map(|t| t.as_str())
        .collect();
        assert_eq!(names, ["size", "timer", "timer_fallback", "drain"]);
        assert_eq!(FlushRequest::new("k".into(), 2).to_string(), "k@2");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use batcher::ReceiveOutcome;
    use contracts::Item;

    use crate::support::{memory_engine, quick_retry, texts};

    /// B=3, W=1000: the third item closes the batch and the late timer is a no-op
    #[tokio::test(start_paused = true)]
    async fn test_size_flush_then_stale_timer() {
        let (engine, sink) = memory_engine(3, 1000, quick_retry(1));

        for item in ["a", "b", "c"] {
            engine.receive("k".into(), item.into()).await.unwrap();
        }
        assert_eq!(sink.batches().len(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].generation(), 0);
        assert_eq!(texts(&batches[0]), ["a", "b", "c"]);
        assert_eq!(engine.timer_stats().stale, 1);
    }

    /// B=3, W=50: a lone item is flushed by its timer, the next one opens generation 1
    #[tokio::test(start_paused = true)]
    async fn test_timer_flush_then_next_generation() {
        let (engine, sink) = memory_engine(3, 50, quick_retry(1));

        engine.receive("k".into(), "x".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let outcome = engine.receive("k".into(), "y".into()).await.unwrap();
        assert_eq!(outcome, ReceiveOutcome::Opened { generation: 1 });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].generation(), 0);
        assert_eq!(texts(&batches[0]), ["x"]);
        assert_eq!(batches[1].generation(), 1);
        assert_eq!(texts(&batches[1]), ["y"]);
    }

    /// Producers on many keys, timers racing size flushes: every item is
    /// delivered once, in order, and each key's generations are 0, 1, 2, ...
    #[tokio::test(start_paused = true)]
    async fn test_many_keys_exactly_once() {
        let (engine, sink) = memory_engine(4, 20, quick_retry(3));
        let engine = Arc::new(engine);
        let keys = 8;
        let per_key = 50;

        let producers: Vec<_> = (0..keys)
            .map(|k| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let key = format!("key-{k}");
                    for i in 0..per_key {
                        engine
                            .receive(key.as_str().into(), Item::from(format!("{k}:{i}")))
                            .await
                            .unwrap();
                        // Gaps around the wait time make timers and size flushes race.
                        tokio::time::sleep(Duration::from_millis(((i * 7 + k) % 25) as u64)).await;
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let engine = Arc::try_unwrap(engine).ok().unwrap();
        engine.shutdown().await.unwrap();

        let mut seen_batches = HashSet::new();
        for k in 0..keys {
            let key = format!("key-{k}");
            let batches = sink.batches_for(&key);

            for (expected, batch) in batches.iter().enumerate() {
                assert_eq!(batch.generation(), expected as u64, "gap in {key}");
                assert!(!batch.is_empty());
                assert!(batch.len() <= 4);
                assert!(seen_batches.insert((key.clone(), batch.generation())));
            }

            let delivered: Vec<String> = batches.iter().flat_map(texts).collect();
            let expected: Vec<String> = (0..per_key).map(|i| format!("{k}:{i}")).collect();
            assert_eq!(delivered, expected, "items of {key}");
        }
    }

    /// A rejected batch is retried as captured even after the key moved on
    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_captured_batch() {
        let (engine, sink) = memory_engine(2, 1000, quick_retry(2));
        sink.fail_next(2);

        engine.receive("k".into(), "a".into()).await.unwrap();
        let err = engine.receive("k".into(), "b".into()).await.unwrap_err();
        let batch = err.undelivered_batch().cloned().expect("closed batch");

        let next = engine.receive("k".into(), "c".into()).await.unwrap();
        assert_eq!(next.generation(), 1);

        engine.redispatch(&batch).await.unwrap();
        let delivered = sink.batches();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].generation(), 0);
        assert_eq!(texts(&delivered[0]), ["a", "b"]);
    }

    /// Keys are isolated: a key that never fills is flushed only by its timer
    #[tokio::test(start_paused = true)]
    async fn test_keys_flush_independently() {
        let (engine, sink) = memory_engine(2, 100, quick_retry(1));

        engine.receive("busy".into(), "1".into()).await.unwrap();
        engine.receive("quiet".into(), "1".into()).await.unwrap();
        engine.receive("busy".into(), "2".into()).await.unwrap();

        assert_eq!(sink.batches_for("busy").len(), 1);
        assert!(sink.batches_for("quiet").is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.batches_for("quiet").len(), 1);
        assert_eq!(engine.timer_stats().flushed, 1);
        assert_eq!(engine.timer_stats().stale, 1);
    }
}

#[cfg(test)]
mod durable_tests {
    use std::time::Duration;

    use batcher::{BatchEngine, ConfiguredStore, FileStateStore, ReceiveOutcome};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{AppConfig, Batch, BatchKey, BatcherConfig, FlushTrigger, KeyStateStore};
    use dispatcher::{create_dispatcher, Dispatcher};
    use tempfile::TempDir;

    use crate::support::{quick_retry, texts, MemorySink};

    fn config(dir: &TempDir, max_batch_size: usize, max_wait_ms: u64) -> AppConfig {
        let toml = format!(
            r#"
[batcher]
max_batch_size = {max_batch_size}
max_wait_ms = {max_wait_ms}

[store]
kind = "file"
path = "{state}"

[sink]
name = "out"
sink_type = "file"

[sink.params]
path = "{out}"
"#,
            state = dir.path().join("state").display(),
            out = dir.path().join("batches.jsonl").display(),
        );
        ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap()
    }

    fn read_batches(dir: &TempDir) -> Vec<Batch> {
        std::fs::read_to_string(dir.path().join("batches.jsonl"))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Config file -> file store -> file sink, with both triggers
    #[tokio::test]
    async fn test_configured_pipeline_writes_jsonl() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 3, 50);

        let store = ConfiguredStore::open(&config.store).await.unwrap();
        let dispatcher = create_dispatcher(&config.sink, &config.dispatch)
            .await
            .unwrap();
        let engine = BatchEngine::start(config.batcher.clone(), store, dispatcher);

        for item in ["a", "b", "c", "d"] {
            engine.receive("k".into(), item.into()).await.unwrap();
        }
        // "d" waits for its timer.
        tokio::time::timeout(Duration::from_secs(2), async {
            while engine.timer_stats().flushed == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        engine.shutdown().await.unwrap();

        let batches = read_batches(&dir);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].generation(), 0);
        assert_eq!(texts(&batches[0]), ["a", "b", "c"]);
        assert_eq!(batches[1].generation(), 1);
        assert_eq!(texts(&batches[1]), ["d"]);

        let reopened = FileStateStore::open(dir.path().join("state")).await.unwrap();
        assert_eq!(reopened.generation(&"k".into()).await.unwrap(), 2);
    }

    /// Open batches in a file store survive the process and drain on restart
    #[tokio::test]
    async fn test_open_batch_survives_restart() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");

        {
            let store = FileStateStore::open(&state_dir).await.unwrap();
            let engine = BatchEngine::start(
                BatcherConfig::new(10, 60_000),
                store,
                Dispatcher::with_policy(MemorySink::default(), quick_retry(1)),
            );
            engine.receive("k".into(), "1".into()).await.unwrap();
            engine.receive("k".into(), "2".into()).await.unwrap();
            // Dropped without shutdown.
        }

        let sink = MemorySink::default();
        let store = FileStateStore::open(&state_dir).await.unwrap();
        let engine = BatchEngine::start(
            BatcherConfig::new(10, 60_000),
            store,
            Dispatcher::with_policy(sink.clone(), quick_retry(1)),
        );
        let report = engine.drain().await.unwrap();

        assert_eq!(report.flushed.len(), 1);
        assert_eq!(report.flushed[0].trigger, FlushTrigger::Drain);
        let batches = sink.batches();
        assert_eq!(batches[0].generation(), 0);
        assert_eq!(texts(&batches[0]), ["1", "2"]);

        let next = engine.receive("k".into(), "3".into()).await.unwrap();
        assert_eq!(next.generation(), 1);
    }

    /// A restarted engine arms a timer for the batch it finds open
    #[tokio::test]
    async fn test_restart_arms_timer_for_open_batch() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");

        {
            let store = FileStateStore::open(&state_dir).await.unwrap();
            let engine = BatchEngine::start(
                BatcherConfig::new(10, 60_000),
                store,
                Dispatcher::with_policy(MemorySink::default(), quick_retry(1)),
            );
            engine.receive("k".into(), "1".into()).await.unwrap();
            // Dropped without shutdown; its timer is far off.
        }

        let sink = MemorySink::default();
        let store = FileStateStore::open(&state_dir).await.unwrap();
        let engine = BatchEngine::start(
            BatcherConfig::new(10, 50),
            store,
            Dispatcher::with_policy(sink.clone(), quick_retry(1)),
        );

        let outcome = engine.receive("k".into(), "2".into()).await.unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Buffered { generation: 0, len: 2 }));

        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.batches().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("open batch flushed by its re-armed timer");

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].generation(), 0);
        assert_eq!(texts(&batches[0]), ["1", "2"]);
        assert_eq!(engine.timer_stats().rearmed, 1);
    }

    /// Key length does not limit the file store
    #[tokio::test]
    async fn test_long_key_on_file_store() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::default();
        let store = FileStateStore::open(dir.path().join("state")).await.unwrap();
        let engine = BatchEngine::start(
            BatcherConfig::new(2, 60_000),
            store,
            Dispatcher::with_policy(sink.clone(), quick_retry(1)),
        );
        let key = "k".repeat(300);

        engine.receive(key.as_str().into(), "a".into()).await.unwrap();
        assert_eq!(engine.store().keys().await.unwrap(), vec![BatchKey::from(key.as_str())]);
        engine.receive(key.as_str().into(), "b".into()).await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].key().as_str(), key);
        assert_eq!(texts(&batches[0]), ["a", "b"]);
    }
}
