//! FileSink - appends batches to a JSON lines file
//!
//! One line per batch: `{"key":..,"generation":..,"items":[..]}`. The
//! `(key, generation)` pair lets a reader drop a batch that was written twice
//! by a retry.

use contracts::{Batch, BatchSink, ContractError};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output file, created if missing and appended to otherwise
    pub path: PathBuf,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> std::io::Result<Self> {
        let path = params.get("path").map(PathBuf::from).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing 'path' parameter")
        })?;
        Ok(Self { path })
    }
}

/// Sink that appends batches to a file
#[derive(Debug)]
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: Option<BufWriter<File>>,
    lines_written: u64,
}

impl FileSink {
    /// Create a new FileSink
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            config,
            writer: Some(BufWriter::new(file)),
            lines_written: 0,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        let config = FileSinkConfig::from_params(params)?;
        Self::new(name, config)
    }

    pub fn path(&self) -> &PathBuf {
        &self.config.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Serialize first so a failed encode writes nothing, then write and
    /// flush the whole line.
    fn append_line(&mut self, batch: &Batch) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(batch)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "sink closed"))?;
        writer.write_all(&line)?;
        writer.flush()?;
        self.lines_written += 1;
        Ok(())
    }

    fn persist_batch(&mut self, batch: &Batch) -> Result<(), ContractError> {
        self.append_line(batch).map_err(|e| {
            error!(
                sink = %self.name,
                key = %batch.key(),
                generation = batch.generation(),
                error = %e,
                "Write failed"
            );
            ContractError::sink_write(&self.name, e.to_string())
        })
    }
}

impl BatchSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, batch),
        fields(sink = %self.name, key = %batch.key(), generation = batch.generation())
    )]
    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        self.persist_batch(batch)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        debug!(sink = %self.name, lines = self.lines_written, "FileSink closed");
        Ok(())
    }
}
