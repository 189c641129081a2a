//! # Dispatcher
//!
//! Batch delivery module.
//!
//! Responsibilities:
//! - Hand each closed `Batch` to the downstream sink
//! - Retry a rejected batch with the same captured items, bounded backoff
//! - Report delivery, retry and failure counters

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod sinks;

pub use contracts::{Batch, BatchSink};
pub use dispatcher::{create_dispatcher, create_sink, DispatchReport, Dispatcher};
pub use error::DispatcherError;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use retry::RetryPolicy;
pub use sinks::{ConfiguredSink, FileSink, FileSinkConfig, LogSink, NetworkSink};
