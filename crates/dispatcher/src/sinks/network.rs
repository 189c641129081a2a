//! NetworkSink - one UDP datagram per batch

use contracts::{Batch, BatchSink, ContractError};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

/// Serialization format for network transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkFormat {
    /// JSON (human-readable, larger)
    #[default]
    Json,
    /// Bincode (binary, compact)
    Bincode,
}

/// Configuration for NetworkSink
#[derive(Debug, Clone)]
pub struct NetworkSinkConfig {
    /// Target address
    pub addr: SocketAddr,
    /// Serialization format
    pub format: NetworkFormat,
    /// Largest datagram we are willing to send (UDP over IPv4 caps at 65507)
    pub max_packet_size: usize,
}

impl NetworkSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr_str = params
            .get("addr")
            .ok_or_else(|| "missing 'addr' parameter".to_string())?;

        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|e| format!("invalid address '{}': {}", addr_str, e))?;

        let format = match params.get("format").map(String::as_str) {
            Some("bincode") => NetworkFormat::Bincode,
            Some("json") | None => NetworkFormat::Json,
            Some(other) => return Err(format!("unknown format '{}'", other)),
        };

        let max_packet_size = match params.get("max_packet_size") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| format!("invalid max_packet_size '{}': {}", raw, e))?,
            None => 65000,
        };

        Ok(Self {
            addr,
            format,
            max_packet_size,
        })
    }
}

/// Sink that sends batches over UDP
#[derive(Debug)]
pub struct NetworkSink {
    name: String,
    config: NetworkSinkConfig,
    socket: Option<UdpSocket>,
}

impl NetworkSink {
    /// Create a new NetworkSink
    #[instrument(name = "network_sink_new", skip(name, config))]
    pub async fn new(name: impl Into<String>, config: NetworkSinkConfig) -> std::io::Result<Self> {
        let name = name.into();
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&config.addr).await?;

        debug!(sink = %name, target = %config.addr, "NetworkSink connected");

        Ok(Self {
            name,
            config,
            socket: Some(socket),
        })
    }

    /// Create from params (for factory)
    #[instrument(name = "network_sink_from_params", skip(name, params))]
    pub async fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = NetworkSinkConfig::from_params(params)
            .map_err(|e| ContractError::sink_write(&name, e))?;

        Self::new(name.clone(), config)
            .await
            .map_err(|e| ContractError::SinkConnection {
                sink_name: name,
                message: e.to_string(),
            })
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<u8>, ContractError> {
        let data = match self.config.format {
            NetworkFormat::Json => {
                serde_json::to_vec(batch).map_err(|e| format!("json error: {}", e))
            }
            NetworkFormat::Bincode => {
                bincode::serialize(batch).map_err(|e| format!("bincode error: {}", e))
            }
        }
        .map_err(|e| ContractError::sink_write(&self.name, e))?;

        // A truncated datagram would deliver part of a batch; refuse instead.
        if data.len() > self.config.max_packet_size {
            return Err(ContractError::sink_write(
                &self.name,
                format!(
                    "batch {}@{} encodes to {} bytes, limit is {}",
                    batch.key(),
                    batch.generation(),
                    data.len(),
                    self.config.max_packet_size
                ),
            ));
        }

        Ok(data)
    }
}

impl BatchSink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "network_sink_write",
        skip(self, batch),
        fields(sink = %self.name, key = %batch.key(), generation = batch.generation())
    )]
    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        let data = self.encode(batch)?;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ContractError::sink_write(&self.name, "socket not connected"))?;

        let sent = socket
            .send(&data)
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        debug!(sink = %self.name, bytes = sent, "Sent");
        Ok(())
    }

    #[instrument(name = "network_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // UDP doesn't buffer
        Ok(())
    }

    #[instrument(name = "network_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.socket = None;
        debug!(sink = %self.name, "NetworkSink closed");
        Ok(())
    }
}
