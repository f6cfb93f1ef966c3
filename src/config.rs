use crate::engine::{DEFAULT_SETTLE_INTERVAL, EngineSettings};
use crate::sensor::{DEFAULT_I2C_ADDRESS_7BIT, DEFAULT_I2C_BUS, RangeUnit};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: tracing::Level = tracing::Level::INFO;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub bus: Option<BusSection>,
    #[serde(default)]
    pub measurement: Option<MeasurementSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusSection {
    /// I2C bus number, as in /dev/i2c-N (default: 4)
    pub i2c_bus: Option<u8>,
    /// 7-bit slave address (default: 0x70)
    pub address: Option<u16>,
    /// Use the simulated sensor instead of real hardware
    #[serde(default)]
    pub simulate: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MeasurementSection {
    /// Settle time between ranging command and result, in milliseconds (default: 100)
    pub settle_interval_ms: Option<u64>,
    pub unit: Option<RangeUnit>,
    #[serde(default)]
    pub continuous_on_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    /// Parsed log level; unknown names fall back to INFO.
    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn i2c_bus(&self) -> u8 {
        self.bus
            .as_ref()
            .and_then(|b| b.i2c_bus)
            .unwrap_or(DEFAULT_I2C_BUS)
    }

    pub fn i2c_address(&self) -> u16 {
        self.bus
            .as_ref()
            .and_then(|b| b.address)
            .unwrap_or(DEFAULT_I2C_ADDRESS_7BIT)
    }

    pub fn simulate(&self) -> bool {
        self.bus.as_ref().is_some_and(|b| b.simulate)
    }

    pub fn settle_interval(&self) -> Duration {
        self.measurement
            .as_ref()
            .and_then(|m| m.settle_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SETTLE_INTERVAL)
    }

    pub fn unit(&self) -> RangeUnit {
        self.measurement
            .as_ref()
            .and_then(|m| m.unit)
            .unwrap_or_default()
    }

    pub fn continuous_on_start(&self) -> bool {
        self.measurement
            .as_ref()
            .is_some_and(|m| m.continuous_on_start)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            settle_interval: self.settle_interval(),
            unit: self.unit(),
        }
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
