//! Forwarding loop: serial lines in, MQTT publishes out.

use chrono::{DateTime, Local};
use std::fmt;
use tracing::{debug, error, info};

use crate::mqtt::BrokerLink;
use crate::reading::Reading;
use crate::serial::reader::SerialReader;

/// Counters collected over one run of the loop
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForwardStats {
    pub published: usize,
    pub failed: usize,
    /// Lines that did not parse as an integer
    pub discarded: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl fmt::Display for ForwardStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} published, {} failed, {} discarded",
            self.published, self.failed, self.discarded
        )?;
        if let Some(last) = self.last_activity {
            write!(f, ", last publish at {}", last.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}

/// Publishes every integer line under `topic`, in read order.
///
/// Runs until the reader's sequence ends, either at end of input or because
/// the reader was closed. Publish failures are logged and skipped; non-numeric
/// lines are dropped without a trace.
pub async fn forward<B: BrokerLink>(
    reader: &mut SerialReader,
    broker: &B,
    topic: &str,
) -> ForwardStats {
    let mut stats = ForwardStats::default();

    while let Some(line) = reader.next_line().await {
        let Some(reading) = Reading::parse(&line) else {
            stats.discarded += 1;
            continue;
        };

        debug!("Reading {}", reading);
        match broker.publish(topic, reading.payload()).await {
            Ok(()) => {
                stats.published += 1;
                stats.last_activity = Some(Local::now());
                info!("Published: Light={}", reading.value());
            }
            Err(e) => {
                stats.failed += 1;
                error!("Error publishing to MQTT: {}", e);
            }
        }
    }

    stats
}
