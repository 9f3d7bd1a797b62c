use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::{BrokerLink, MqttError};

/// Capacity of the request channel between client and event loop
const REQUEST_CAPACITY: usize = 10;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Single connection to the broker.
///
/// After the CONNACK a background task drives the rumqttc event loop until the
/// connection is closed or lost. Disconnect may be called from any task, any
/// number of times.
pub struct MqttHandler {
    client: AsyncClient,
    config: MqttConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    closing: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttHandler {
    /// Connects and waits for the broker's answer.
    ///
    /// Fails if the broker is unreachable, rejects the session, or stays silent
    /// for longer than the configured connect timeout. No retry is attempted.
    pub async fn connect(config: &MqttConfig) -> Result<Self, MqttError> {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        mqtt_options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let state = Arc::new(watch::Sender::new(ConnectionState::Connecting));

        debug!("Connecting to {} as {}", config.address(), config.client_id);
        let handshake = tokio::time::timeout(
            config.connect_timeout(),
            wait_for_connack(&mut eventloop),
        )
        .await;

        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                state.send_replace(ConnectionState::Failed);
                return Err(e);
            }
            Err(_) => {
                state.send_replace(ConnectionState::Failed);
                return Err(MqttError::Timeout(config.connect_timeout()));
            }
        }

        state.send_replace(ConnectionState::Connected);
        let closing = Arc::new(AtomicBool::new(false));
        let driver = tokio::spawn(drive_event_loop(eventloop, state.clone(), closing.clone()));

        Ok(Self {
            client,
            config: config.clone(),
            state,
            closing,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl BrokerLink for MqttHandler {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), MqttError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            debug!("MQTT disconnect already requested");
            return;
        }

        let grace = self.config.disconnect_grace();
        match tokio::time::timeout(grace, self.client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Disconnect request not delivered: {}", e),
            Err(_) => warn!("Disconnect request not accepted within {:?}", grace),
        }

        let driver = self.driver.lock().await.take();
        if let Some(mut handle) = driver {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("MQTT event loop still busy after {:?}, aborting it", grace);
                handle.abort();
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("Disconnected from MQTT broker");
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), MqttError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(MqttError::Rejected(format!("{:?}", ack.code)))
                };
            }
            Ok(event) => debug!("Event before CONNACK: {:?}", event),
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(MqttError::Rejected(format!("{:?}", code)));
            }
            Err(e) => return Err(MqttError::Connect(e)),
        }
    }
}

/// Polls the event loop so queued publishes reach the network.
///
/// Stops after the DISCONNECT packet went out or on the first connection
/// error. There is no reconnect.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    state: Arc<watch::Sender<ConnectionState>>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent to broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    debug!("MQTT event loop ended during shutdown: {}", e);
                } else {
                    error!("Lost connection to MQTT broker: {}", e);
                    state.send_replace(ConnectionState::Failed);
                }
                break;
            }
        }
    }
}
