//! Layered bridge configuration.
//!
//! Built-in defaults, then an optional TOML file, then environment variables
//! and command-line flags.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::mqtt::config::{parse_broker_address, MqttConfig};
use crate::serial::{SerialConfig, MAX_READ_TIMEOUT_MS};

const CONFIG_DIR: &str = "microbit-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Forwards light readings from a micro:bit on a serial port to an MQTT broker.
#[derive(Parser, Debug, Default)]
#[command(name = "microbit-bridge", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "MICROBIT_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serial device path
    #[arg(long, env = "MICROBIT_SERIAL_PORT")]
    pub device: Option<String>,

    /// Serial baud rate
    #[arg(long, env = "MICROBIT_BAUD_RATE")]
    pub baud: Option<u32>,

    /// Broker address: host, host:port or tcp://host:port
    #[arg(long, env = "MQTT_BROKER")]
    pub broker: Option<String>,

    #[arg(long, env = "MQTT_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Topic the readings are published under
    #[arg(long, env = "MQTT_TOPIC")]
    pub topic: Option<String>,

    /// Delay in milliseconds between opening the port and the first read
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Print the available serial ports and exit
    #[arg(long)]
    pub list_ports: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
}

impl BridgeConfig {
    /// Resolves the final configuration for this run.
    ///
    /// An explicit `--config` file must exist; the per-user default file is
    /// only read when present.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_overrides(cli)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_overrides(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(device) = &cli.device {
            self.serial.port = device.clone();
        }
        if let Some(baud) = cli.baud {
            self.serial.baud_rate = baud;
        }
        if let Some(settle_ms) = cli.settle_ms {
            self.serial.settle_ms = settle_ms;
        }
        if let Some(broker) = &cli.broker {
            let (host, port) = parse_broker_address(broker)
                .ok_or_else(|| ConfigError::Invalid(format!("bad broker address '{}'", broker)))?;
            self.mqtt.host = host;
            self.mqtt.port = port;
        }
        if let Some(client_id) = &cli.client_id {
            self.mqtt.client_id = client_id.clone();
        }
        if let Some(topic) = &cli.topic {
            self.mqtt.topic = topic.clone();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid("serial port path is empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud rate must be positive".into()));
        }
        let read_timeout_ms = self.serial.read_timeout_ms;
        if read_timeout_ms == 0 || read_timeout_ms > MAX_READ_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "read timeout must be between 1 and {} ms, got {}",
                MAX_READ_TIMEOUT_MS, read_timeout_ms
            )));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker host is empty".into()));
        }
        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::Invalid("client id is empty".into()));
        }
        if self.mqtt.topic.is_empty() {
            return Err(ConfigError::Invalid("topic is empty".into()));
        }
        if self.mqtt.topic.contains(['+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "topic '{}' contains wildcards",
                self.mqtt.topic
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Some(path)
}
