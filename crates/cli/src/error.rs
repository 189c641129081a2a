//! Error types for CLI operations.

use std::path::Path;

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Input line that is not `<key> <payload>`
    #[error("Malformed input on line {line}: {message}")]
    MalformedLine { line: u64, message: String },

    /// Batching engine failed while running or shutting down
    #[error("Pipeline execution failed: {message}")]
    Pipeline { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: &Path) -> Self {
        Self::ConfigNotFound {
            path: path.display().to_string(),
        }
    }

    pub fn malformed_line(line: u64, message: impl Into<String>) -> Self {
        Self::MalformedLine {
            line,
            message: message.into(),
        }
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
