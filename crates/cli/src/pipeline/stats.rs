//! Pipeline statistics and metrics.

use std::time::Duration;

use batcher::TimerStatsSnapshot;
use dispatcher::MetricsSnapshot;
use observability::BatchMetricsAggregator;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Input lines read, blank and comment lines included
    pub lines_read: u64,

    /// Lines that were not `<key> <payload>`
    pub malformed_lines: u64,

    /// Distinct keys seen
    pub keys: usize,

    /// Items the engine refused (store unavailable, invalid key)
    pub receive_errors: u64,

    /// Input was cut short by a signal or the timeout
    pub interrupted: bool,

    /// Total duration of the run
    pub duration: Duration,

    /// Flushes seen by the input workers and the final drain
    pub batches: BatchMetricsAggregator,

    /// Timer loop counters
    pub timer: TimerStatsSnapshot,

    /// Sink delivery counters
    pub dispatch: MetricsSnapshot,
}

impl PipelineStats {
    /// Items accepted per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.batches.total_items as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Lines read: {}", self.lines_read);
        println!("   ├─ Malformed lines: {}", self.malformed_lines);
        println!("   ├─ Keys: {}", self.keys);
        println!("   ├─ Receive errors: {}", self.receive_errors);
        println!("   └─ Items/s: {:.2}", self.throughput());

        let summary = self.batches.summary();
        println!("\n📦 Batches");
        println!("   ├─ Items accepted: {}", summary.total_items);
        println!("   ├─ Closed on receive or drain: {}", summary.total_batches);
        for (trigger, count) in &summary.by_trigger {
            println!("   │  ├─ {}: {}", trigger, count);
        }
        println!("   ├─ Closed by timer: {}", self.timer.flushed);
        println!("   ├─ Batch size: {}", summary.batch_size);
        println!("   └─ Dispatch failures: {}", summary.dispatch_failures);

        println!("\n⏱  Timers");
        println!("   ├─ Fired: {}", self.timer.fired);
        println!("   ├─ Stale: {}", self.timer.stale);
        println!("   ├─ Empty: {}", self.timer.empty);
        println!("   ├─ Rescheduled: {}", self.timer.rescheduled);
        println!("   ├─ Armed for open batches at start: {}", self.timer.rearmed);
        println!(
            "   └─ Redelivered / undelivered: {} / {}",
            self.timer.redelivered, self.timer.undelivered
        );

        println!("\n📤 Sink");
        println!("   ├─ Batches delivered: {}", self.dispatch.batch_count);
        println!("   ├─ Items delivered: {}", self.dispatch.item_count);
        println!("   ├─ Retried writes: {}", self.dispatch.retry_count);
        println!("   └─ Rejected batches: {}", self.dispatch.failure_count);

        println!();
    }
}
