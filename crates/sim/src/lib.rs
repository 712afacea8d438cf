//! simulation tools for the Flowline packet conveyor

pub mod scenarios;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use flowline_queueing::{
    Bits, Datarate, ProductionInterval, QueueConfig, ServerConfig, SinkConfig, SourceConfig,
    StreamerConfig,
};
use serde::{Deserialize, Serialize};

/// Everything needed to build and run one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub duration: Duration,
    pub server: ServerConfig,
    pub express: SourceConfig,
    pub bulk: SourceConfig,
    pub express_queue: QueueConfig,
    pub bulk_queue: QueueConfig,
    pub streamer: StreamerConfig,
    pub sink: SinkConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        SimulationPresets::light_load()
    }
}

impl ScenarioConfig {
    /// Parses a JSON document; missing fields keep their default values.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: ScenarioConfig = serde_json::from_str(json).context("malformed scenario config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid scenario config {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.duration.is_zero(), "scenario duration must be positive");
        self.server.validate()?;
        self.express.validate()?;
        self.bulk.validate()?;
        self.express_queue.validate()?;
        self.bulk_queue.validate()?;
        self.streamer.validate()?;
        self.sink.validate()?;
        Ok(())
    }
}

fn source(name: &str, length: usize, mean: Duration, seed: u64) -> SourceConfig {
    SourceConfig {
        packet_name: name.to_string(),
        packet_length: length,
        interval: ProductionInterval::Exponential { mean },
        seed,
        limit: None,
    }
}

pub struct SimulationPresets;

impl SimulationPresets {
    /// 100 kbps link, bulk traffic at about 60% load.
    pub fn light_load() -> ScenarioConfig {
        ScenarioConfig {
            duration: Duration::from_secs(60),
            server: ServerConfig {
                datarate: Datarate::kbps(100.0),
            },
            express: source("express", 100, Duration::from_millis(500), 1),
            bulk: source("bulk", 1500, Duration::from_millis(200), 2),
            express_queue: QueueConfig::default(),
            bulk_queue: QueueConfig { capacity: Some(64) },
            streamer: StreamerConfig::default(),
            sink: SinkConfig::default(),
        }
    }

    /// Same link pushed past 90% load with a short bulk queue.
    pub fn heavy_load() -> ScenarioConfig {
        ScenarioConfig {
            express: source("express", 100, Duration::from_millis(200), 3),
            bulk: source("bulk", 1500, Duration::from_millis(130), 4),
            bulk_queue: QueueConfig { capacity: Some(32) },
            ..Self::light_load()
        }
    }

    /// 9.6 kbps link where every preemption is expensive.
    pub fn slow_link() -> ScenarioConfig {
        ScenarioConfig {
            duration: Duration::from_secs(300),
            server: ServerConfig {
                datarate: Datarate::kbps(9.6),
            },
            express: source("express", 64, Duration::from_secs(2), 5),
            bulk: source("bulk", 500, Duration::from_secs(1), 6),
            streamer: StreamerConfig {
                min_packet_length: Bits::from_bytes(32),
                ..StreamerConfig::default()
            },
            ..Self::light_load()
        }
    }

    /// Receiver that needs time for every packet, throttling the server.
    pub fn congested_sink() -> ScenarioConfig {
        ScenarioConfig {
            sink: SinkConfig {
                consumption_interval: Some(Duration::from_millis(150)),
            },
            ..Self::light_load()
        }
    }

    pub fn by_name(name: &str) -> Option<ScenarioConfig> {
        match name {
            "light" => Some(Self::light_load()),
            "heavy" => Some(Self::heavy_load()),
            "slow" => Some(Self::slow_link()),
            "congested" => Some(Self::congested_sink()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for name in ["light", "heavy", "slow", "congested"] {
            let config = SimulationPresets::by_name(name).unwrap();
            assert!(config.validate().is_ok(), "{name} preset is invalid");
        }
        assert!(SimulationPresets::by_name("solar-storm").is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ScenarioConfig::from_json(
            r#"{ "duration": { "secs": 5, "nanos": 0 }, "bulk_queue": { "capacity": 4 } }"#,
        )
        .unwrap();

        assert_eq!(config.duration, Duration::from_secs(5));
        assert_eq!(config.bulk_queue.capacity, Some(4));
        assert_eq!(config.server.datarate, Datarate::kbps(100.0));
        assert_eq!(config.bulk.packet_name, "bulk");
    }

    #[test]
    fn test_invalid_json_config_rejected() {
        assert!(ScenarioConfig::from_json("{ not json").is_err());
        assert!(ScenarioConfig::from_json(r#"{ "server": { "datarate": 0.0 } }"#).is_err());
        assert!(ScenarioConfig::from_json(r#"{ "duration": { "secs": 0, "nanos": 0 } }"#).is_err());
    }
}
