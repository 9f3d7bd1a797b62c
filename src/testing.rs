//! In-memory broker used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::mqtt::{BrokerLink, MqttError};

/// Records every publish; optionally fails for one payload.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<(String, String)>>,
    fail_payload: Option<String>,
    disconnects: AtomicUsize,
}

impl RecordingBroker {
    pub fn failing_on(payload: &str) -> Self {
        Self {
            fail_payload: Some(payload.to_string()),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl BrokerLink for RecordingBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), MqttError> {
        if self.fail_payload.as_deref() == Some(payload.as_str()) {
            return Err(MqttError::Rejected("simulated publish failure".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
