pub mod config;
pub mod forwarder;
pub mod mqtt;
pub mod reading;
pub mod serial;
pub mod shutdown;
#[cfg(test)]
mod testing;

use crate::config::{BridgeConfig, Cli};
use crate::mqtt::mqtt_handler::{ConnectionState, MqttHandler};
use crate::mqtt::BrokerLink;
use crate::serial::reader::SerialReader;
use crate::shutdown::ShutdownHandler;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let cli = Cli::parse();

    if cli.list_ports {
        serial::list_ports()?;
        return Ok(());
    }

    let config = BridgeConfig::load(&cli)?;
    run(config).await
}

async fn run(config: BridgeConfig) -> Result<()> {
    // Broker first: a failure here must not touch the serial device.
    let broker = MqttHandler::connect(&config.mqtt)
        .await
        .map_err(|e| eyre!("Failed to connect to MQTT broker {}: {}", config.mqtt.address(), e))?;
    let broker = Arc::new(broker);
    info!("Connected to MQTT broker {}", config.mqtt.address());

    let mut reader = match SerialReader::open(&config.serial).await {
        Ok(reader) => reader,
        Err(e) => {
            broker.disconnect().await;
            return Err(eyre!(e));
        }
    };
    info!(
        "Forwarding readings from {} to topic {}",
        config.serial.port, config.mqtt.topic
    );

    let shutdown = ShutdownHandler::new();
    let _signals = shutdown.arm(reader.closer(), broker.clone());

    let stats = forwarder::forward(&mut reader, broker.as_ref(), &config.mqtt.topic).await;
    if broker.state() == ConnectionState::Failed {
        warn!("Broker connection was lost during the run");
    }
    info!(
        "Forwarding stopped ({}): {}",
        shutdown.state().stop_reason(),
        stats
    );

    shutdown.complete(&reader.closer(), broker.as_ref()).await;
    debug!("Bridge finished in state {:?}", shutdown.state());
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .init();
}
