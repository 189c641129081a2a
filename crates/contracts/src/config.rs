//! AppConfig - Config Loader output
//!
//! Thresholds, dispatch retry policy, state store and output sink. Fixed at
//! construction; nothing here is reconfigured at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    /// Flush thresholds
    #[validate(nested)]
    pub batcher: BatcherConfig,

    /// Sink retry policy
    #[serde(default)]
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Key state storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Output sink
    pub sink: SinkConfig,
}

/// Flush thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BatcherConfig {
    /// Batch is flushed as soon as it holds this many items
    #[validate(range(min = 1))]
    pub max_batch_size: usize,

    /// Batch is flushed at most this long after its first item arrived
    #[validate(range(min = 1))]
    pub max_wait_ms: u64,

    /// Attempts at scheduling the wait timer before closing the batch early
    #[serde(default = "default_schedule_attempts")]
    #[validate(range(min = 1))]
    pub schedule_attempts: u32,
}

fn default_schedule_attempts() -> u32 {
    3
}

impl BatcherConfig {
    pub fn new(max_batch_size: usize, max_wait_ms: u64) -> Self {
        Self {
            max_batch_size,
            max_wait_ms,
            schedule_attempts: default_schedule_attempts(),
        }
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::new(10, 1000)
    }
}

/// Retry policy for handing a batch to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Total write attempts per dispatch (1 = no retry)
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on each further retry
    pub initial_backoff_ms: u64,

    /// Upper bound for the retry delay
    pub max_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

/// Key state storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// State directory (file store only)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Process memory; state is lost on exit
    #[default]
    Memory,
    /// One JSON file per key
    File,
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log output
    Log,
    /// JSON lines file
    File,
    /// UDP datagrams
    Network,
}
