//! Layered error definitions
//!
//! Categorized by source: config / store / timer / sink

use thiserror::Error;

/// Error reported by the collaborators behind the contract traits
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Store Errors =====
    /// Key state could not be read
    #[error("store read failed for key '{key}': {message}")]
    StoreRead { key: String, message: String },

    /// Key state could not be written
    #[error("store write failed for key '{key}': {message}")]
    StoreWrite { key: String, message: String },

    // ===== Timer Errors =====
    /// Timer service refused a schedule request
    #[error("timer rejected {request}: {message}")]
    TimerRejected { request: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn store_read(key: impl Into<String>, message: impl ToString) -> Self {
        Self::StoreRead {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn store_write(key: impl Into<String>, message: impl ToString) -> Self {
        Self::StoreWrite {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn timer_rejected(request: impl ToString, message: impl Into<String>) -> Self {
        Self::TimerRejected {
            request: request.to_string(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}
