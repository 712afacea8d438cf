//! Construction parameters of the configurable elements.

use std::time::Duration;

use flowline_core::{Bits, Datarate, FlowError, Result};
use serde::{Deserialize, Serialize};

fn invalid(message: impl Into<String>) -> FlowError {
    FlowError::InvalidConfig(message.into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub datarate: Datarate,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            datarate: Datarate::kbps(100.0),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.datarate.is_valid() || self.datarate.is_unlimited() {
            return Err(invalid(format!("server datarate must be finite and positive, got {}", self.datarate)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Streaming rate in push mode; `None` streams instantly.
    pub datarate: Option<Datarate>,
    /// Shortest fragment a preemption may leave behind, on either side.
    pub min_packet_length: Bits,
    /// Preemption positions are rounded up to a multiple of this length.
    pub rounding_length: Bits,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            datarate: None,
            min_packet_length: Bits::from_bytes(64),
            rounding_length: Bits::from_bytes(8),
        }
    }
}

impl StreamerConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(datarate) = self.datarate {
            if !datarate.is_valid() {
                return Err(invalid(format!("streamer datarate must be positive, got {}", datarate)));
            }
        }
        if self.rounding_length == Bits::ZERO || !self.rounding_length.is_byte_aligned() {
            return Err(invalid("rounding length must be a positive whole number of bytes"));
        }
        if !self.min_packet_length.is_byte_aligned() {
            return Err(invalid("minimum packet length must be a whole number of bytes"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductionInterval {
    Fixed { interval: Duration },
    Exponential { mean: Duration },
}

impl ProductionInterval {
    fn mean(&self) -> Duration {
        match self {
            ProductionInterval::Fixed { interval } => *interval,
            ProductionInterval::Exponential { mean } => *mean,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub packet_name: String,
    /// Payload length in bytes.
    pub packet_length: usize,
    pub interval: ProductionInterval,
    pub seed: u64,
    /// Stop after this many packets.
    pub limit: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            packet_name: "data".to_string(),
            packet_length: 1000,
            interval: ProductionInterval::Fixed {
                interval: Duration::from_millis(100),
            },
            seed: 42,
            limit: None,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.packet_length == 0 {
            return Err(invalid("source packet length must be positive"));
        }
        if self.interval.mean().is_zero() {
            return Err(invalid("source production interval must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queued packets; unbounded when `None`.
    pub capacity: Option<usize>,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == Some(0) {
            return Err(invalid("queue capacity must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Time spent consuming each packet; packets are consumed instantly when `None`.
    pub consumption_interval: Option<Duration>,
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.consumption_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(invalid("sink consumption interval must be positive"));
        }
        Ok(())
    }
}
