use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default MQTT port used when the broker address carries none.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Broker endpoint and session settings for the outbound connection.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic every reading is published under
    pub topic: String,
    pub keep_alive_secs: u64,
    /// Upper bound for waiting on the broker's CONNACK
    pub connect_timeout_secs: u64,
    /// Best-effort flush window used by disconnect
    pub disconnect_grace_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id: "microbit-reader".to_string(),
            topic: "lab/3pm25b/microbit/luz".to_string(),
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            disconnect_grace_ms: 250,
        }
    }
}

impl MqttConfig {
    /// Printable `tcp://host:port` form of the broker endpoint.
    pub fn address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

/// Splits a broker address into host and port.
///
/// Accepts `host`, `host:port`, `tcp://host:port` and `mqtt://host:port`.
/// A missing port falls back to [`DEFAULT_BROKER_PORT`].
pub fn parse_broker_address(address: &str) -> Option<(String, u16)> {
    let address = address.trim();
    let without_scheme = address
        .strip_prefix("tcp://")
        .or_else(|| address.strip_prefix("mqtt://"))
        .unwrap_or(address)
        .trim_end_matches('/');

    if without_scheme.is_empty() || without_scheme.contains("://") {
        return None;
    }

    match without_scheme.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return None;
            }
            let port = port.parse().ok()?;
            Some((host.to_string(), port))
        }
        None => Some((without_scheme.to_string(), DEFAULT_BROKER_PORT)),
    }
}
