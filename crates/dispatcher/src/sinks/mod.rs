//! Sink implementations
//!
//! Contains LogSink, FileSink, and NetworkSink, plus `ConfiguredSink` for
//! choosing one of them from configuration at runtime.

mod file;
mod log;
mod network;

pub use self::file::{FileSink, FileSinkConfig};
pub use self::log::LogSink;
pub use self::network::{NetworkFormat, NetworkSink, NetworkSinkConfig};

use contracts::{Batch, BatchSink, ContractError};

/// Sink selected by `SinkConfig::sink_type`
#[derive(Debug)]
pub enum ConfiguredSink {
    Log(LogSink),
    File(FileSink),
    Network(NetworkSink),
}

impl BatchSink for ConfiguredSink {
    fn name(&self) -> &str {
        match self {
            ConfiguredSink::Log(sink) => sink.name(),
            ConfiguredSink::File(sink) => sink.name(),
            ConfiguredSink::Network(sink) => sink.name(),
        }
    }

    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        match self {
            ConfiguredSink::Log(sink) => sink.write(batch).await,
            ConfiguredSink::File(sink) => sink.write(batch).await,
            ConfiguredSink::Network(sink) => sink.write(batch).await,
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        match self {
            ConfiguredSink::Log(sink) => sink.flush().await,
            ConfiguredSink::File(sink) => sink.flush().await,
            ConfiguredSink::Network(sink) => sink.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self {
            ConfiguredSink::Log(sink) => sink.close().await,
            ConfiguredSink::File(sink) => sink.close().await,
            ConfiguredSink::Network(sink) => sink.close().await,
        }
    }
}
