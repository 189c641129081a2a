//! Batcher metrics
//!
//! Prometheus-facing counters/histograms through the `metrics` facade, plus an
//! in-memory aggregator for end-of-run summaries.

use std::collections::BTreeMap;

use contracts::FlushTrigger;
use metrics::{counter, gauge, histogram};

/// Record an item accepted by `receive`
pub fn record_item_received() {
    counter!("keybatch_items_received_total").increment(1);
}

/// Record a batch opened by its first item (wait timer scheduled)
pub fn record_batch_opened() {
    counter!("keybatch_batches_opened_total").increment(1);
}

/// Record a closed batch
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_flush;
///
/// record_flush(FlushTrigger::Size, batch.len(), batch.generation());
/// ```
pub fn record_flush(trigger: FlushTrigger, size: usize, generation: u64) {
    counter!("keybatch_batches_flushed_total", "trigger" => trigger.as_str()).increment(1);
    histogram!("keybatch_batch_size").record(size as f64);
    gauge!("keybatch_last_flushed_generation").set(generation as f64);
}

/// Record a timer fire that found its generation already closed
///
/// `path` is `"fast"` when the unlocked check caught it, `"slow"` when the
/// recheck under the key's turn did.
pub fn record_stale_timer(path: &'static str) {
    counter!("keybatch_stale_timer_fires_total", "path" => path).increment(1);
}

/// Record a rejected timer schedule request
pub fn record_timer_schedule_failure() {
    counter!("keybatch_timer_schedule_failures_total").increment(1);
}

/// Record the outcome of handing a batch to a sink
pub fn record_batch_dispatched(sink_name: &str, success: bool, items: usize) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "keybatch_batches_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
    if success {
        counter!("keybatch_items_dispatched_total", "sink" => sink_name.to_string())
            .increment(items as u64);
    }
}

/// Record one retried sink write
pub fn record_dispatch_retry(sink_name: &str) {
    counter!("keybatch_dispatch_retries_total", "sink" => sink_name.to_string()).increment(1);
}

/// Record time spent delivering one batch, retries included
pub fn record_dispatch_latency_ms(latency_ms: f64) {
    histogram!("keybatch_dispatch_latency_ms").record(latency_ms);
}

/// In-memory batch statistics
#[derive(Debug, Clone, Default)]
pub struct BatchMetricsAggregator {
    /// Items accepted
    pub total_items: u64,

    /// Batches closed
    pub total_batches: u64,

    /// Closed batches per trigger
    pub by_trigger: BTreeMap<&'static str, u64>,

    /// Timer fires ignored as stale
    pub stale_timer_fires: u64,

    /// Batches the sink rejected after all retries
    pub dispatch_failures: u64,

    /// Batch size distribution
    pub batch_sizes: RunningStats,
}

impl BatchMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_item(&mut self) {
        self.total_items += 1;
    }

    pub fn record_flush(&mut self, trigger: FlushTrigger, size: usize) {
        self.total_batches += 1;
        *self.by_trigger.entry(trigger.as_str()).or_insert(0) += 1;
        self.batch_sizes.push(size as f64);
    }

    pub fn record_stale(&mut self) {
        self.stale_timer_fires += 1;
    }

    pub fn record_dispatch_failure(&mut self) {
        self.dispatch_failures += 1;
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_items: self.total_items,
            total_batches: self.total_batches,
            by_trigger: self.by_trigger.clone(),
            stale_timer_fires: self.stale_timer_fires,
            dispatch_failures: self.dispatch_failures,
            batch_size: StatsSummary::from(&self.batch_sizes),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_items: u64,
    pub total_batches: u64,
    pub by_trigger: BTreeMap<&'static str, u64>,
    pub stale_timer_fires: u64,
    pub dispatch_failures: u64,
    pub batch_size: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Batch Metrics Summary ===")?;
        writeln!(f, "Items received: {}", self.total_items)?;
        writeln!(f, "Batches flushed: {}", self.total_batches)?;
        for (trigger, count) in &self.by_trigger {
            writeln!(f, "  {trigger}: {count}")?;
        }
        writeln!(f, "Stale timer fires: {}", self.stale_timer_fires)?;
        writeln!(f, "Dispatch failures: {}", self.dispatch_failures)?;
        writeln!(f, "Batch size: {}", self.batch_size)?;
        Ok(())
    }
}

/// Summary of a [`RunningStats`]
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.2}, std={:.2} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
