//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Sink kept rejecting a batch until the retry budget ran out
    #[error(
        "sink '{sink_name}' rejected batch {key}@{generation} after {attempts} attempt(s): {source}"
    )]
    Rejected {
        sink_name: String,
        key: String,
        generation: u64,
        attempts: u32,
        #[source]
        source: contracts::ContractError,
    },

    /// Sink lifecycle error (flush/close)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
