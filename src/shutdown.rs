//! Signal-driven teardown of the serial device and the broker connection.
//!
//! `Running -> Closing -> Terminated`. Only the first trigger does any work;
//! later triggers (a second Ctrl+C, or the main task finishing) observe the
//! state and return.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::mqtt::BrokerLink;
use crate::serial::reader::SerialCloser;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ShutdownState {
    #[default]
    Running,
    Closing,
    Terminated,
}

impl ShutdownState {
    /// Why the forwarding loop returned, as seen from this state.
    pub fn stop_reason(&self) -> &'static str {
        match self {
            ShutdownState::Running => "serial stream ended",
            ShutdownState::Closing | ShutdownState::Terminated => "shutdown requested",
        }
    }
}

pub struct ShutdownHandler {
    state: watch::Sender<ShutdownState>,
}

impl ShutdownHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: watch::Sender::new(ShutdownState::Running),
        })
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Spawns the listener for SIGINT/SIGTERM.
    ///
    /// Every signal goes through [`ShutdownHandler::shutdown`], so repeated
    /// signals are harmless.
    pub fn arm<B>(self: &Arc<Self>, serial: SerialCloser, broker: Arc<B>) -> JoinHandle<()>
    where
        B: BrokerLink + 'static,
    {
        let handler = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = wait_for_signal().await {
                    error!("Unable to listen for shutdown signals: {}", e);
                    return;
                }
                info!("Shutdown requested by user");
                handler.shutdown(&serial, broker.as_ref()).await;
            }
        })
    }

    /// Closes the serial device, then disconnects the broker.
    ///
    /// Returns `false` when a shutdown was already started.
    pub async fn shutdown<B: BrokerLink>(&self, serial: &SerialCloser, broker: &B) -> bool {
        let started = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Closing;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("Shutdown already in progress");
            return false;
        }

        serial.close();
        broker.disconnect().await;
        self.state.send_replace(ShutdownState::Terminated);
        true
    }

    /// Runs the teardown if nobody did yet, otherwise waits for the running
    /// one to finish.
    pub async fn complete<B: BrokerLink>(&self, serial: &SerialCloser, broker: &B) {
        if self.shutdown(serial, broker).await {
            return;
        }
        let mut state = self.state.subscribe();
        if state
            .wait_for(|state| *state == ShutdownState::Terminated)
            .await
            .is_err()
        {
            debug!("Shutdown state channel closed");
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::reader::SerialReader;
    use crate::testing::RecordingBroker;
    use std::io::Cursor;

    #[tokio::test]
    async fn first_trigger_closes_both_resources() {
        let reader = SerialReader::from_source(Cursor::new(Vec::new()));
        let closer = reader.closer();
        let broker = RecordingBroker::default();
        let handler = ShutdownHandler::new();

        assert_eq!(handler.state(), ShutdownState::Running);
        assert!(handler.shutdown(&closer, &broker).await);

        assert!(closer.is_closed());
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(handler.state(), ShutdownState::Terminated);
    }

    #[tokio::test]
    async fn stop_reason_follows_state() {
        let reader = SerialReader::from_source(Cursor::new(Vec::new()));
        let closer = reader.closer();
        let broker = RecordingBroker::default();
        let handler = ShutdownHandler::new();

        assert_eq!(handler.state().stop_reason(), "serial stream ended");
        handler.shutdown(&closer, &broker).await;
        assert_eq!(handler.state().stop_reason(), "shutdown requested");
        assert_eq!(ShutdownState::Closing.stop_reason(), "shutdown requested");
    }

    #[tokio::test]
    async fn repeated_triggers_are_no_ops() {
        let reader = SerialReader::from_source(Cursor::new(Vec::new()));
        let closer = reader.closer();
        let broker = RecordingBroker::default();
        let handler = ShutdownHandler::new();

        assert!(handler.shutdown(&closer, &broker).await);
        assert!(!handler.shutdown(&closer, &broker).await);
        handler.complete(&closer, &broker).await;

        assert_eq!(broker.disconnects(), 1);
        assert!(broker.published().is_empty());
        assert_eq!(handler.state(), ShutdownState::Terminated);
    }

    #[tokio::test]
    async fn complete_tears_down_after_stream_end() {
        let reader = SerialReader::from_source(Cursor::new(Vec::new()));
        let closer = reader.closer();
        let broker = RecordingBroker::default();
        let handler = ShutdownHandler::new();

        handler.complete(&closer, &broker).await;

        assert!(closer.is_closed());
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(handler.state(), ShutdownState::Terminated);
    }

    #[tokio::test]
    async fn shutdown_ends_a_blocked_forwarding_loop() {
        struct IdlePort;
        impl std::io::Read for IdlePort {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                std::thread::sleep(std::time::Duration::from_millis(10));
                Err(std::io::ErrorKind::TimedOut.into())
            }
        }

        let mut reader = SerialReader::from_source(IdlePort);
        let closer = reader.closer();
        let broker = Arc::new(RecordingBroker::default());
        let handler = ShutdownHandler::new();

        let loop_broker = broker.clone();
        let forwarding = tokio::spawn(async move {
            crate::forwarder::forward(&mut reader, loop_broker.as_ref(), "t").await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(handler.shutdown(&closer, broker.as_ref()).await);

        let stats = tokio::time::timeout(std::time::Duration::from_secs(1), forwarding)
            .await
            .expect("forwarding loop must end after shutdown")
            .unwrap();
        assert_eq!(stats.published, 0);
        assert_eq!(broker.disconnects(), 1);
    }
}
