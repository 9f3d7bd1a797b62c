//! # MQTT Integration Module
//!
//! Owns the single outbound broker connection used to republish sensor readings.
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Broker endpoint, session options and address parsing
//! └── mqtt_handler.rs  - Connection lifecycle: connect, publish, disconnect
//! ```
//!
//! Delivery is fire-and-forget (QoS 0, not retained). The connection is never
//! re-established once lost; publishes after that point fail and are logged by
//! the caller.

pub mod config;
pub mod mqtt_handler;

use std::future::Future;

/// Errors raised by the broker connection
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// Network or protocol failure while establishing the connection
    #[error("Connection error: {0}")]
    Connect(#[from] rumqttc::ConnectionError),

    /// Broker answered the CONNECT with a non-success return code
    #[error("Connection rejected by broker: {0}")]
    Rejected(String),

    /// No CONNACK arrived in time
    #[error("Timed out after {0:?} waiting for the broker")]
    Timeout(std::time::Duration),

    /// Request could not be handed to the connection (closed or gone)
    #[error("Publish error: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// Publish-capable side of a broker connection.
///
/// Implemented by [`mqtt_handler::MqttHandler`]; the forwarding loop and the
/// shutdown path only depend on this seam.
pub trait BrokerLink: Send + Sync {
    /// Sends one message at QoS 0, not retained.
    fn publish(
        &self,
        topic: &str,
        payload: String,
    ) -> impl Future<Output = Result<(), MqttError>> + Send;

    /// Best-effort flush and close. Later calls are no-ops.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}
