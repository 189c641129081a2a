//! LogSink - logs batch summary via tracing

use contracts::{Batch, BatchSink, ContractError};
use tracing::{info, instrument};

/// Sink that logs batch summaries for debugging
#[derive(Debug)]
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_batch_summary(&self, batch: &Batch) {
        let bytes: usize = batch.items().iter().map(|item| item.len()).sum();
        let first = batch.items().first().and_then(|item| item.as_text());

        info!(
            sink = %self.name,
            key = %batch.key(),
            generation = batch.generation(),
            items = batch.len(),
            bytes,
            first = ?first,
            "Batch received"
        );
    }
}

impl BatchSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, batch),
        fields(sink = %self.name, key = %batch.key(), generation = batch.generation())
    )]
    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        self.log_batch_summary(batch);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
