//! # Serial Input Module
//!
//! Opens the sensor's serial device and turns its byte stream into a lazy
//! sequence of trimmed, non-empty text lines.
//!
//! The blocking port is read on a dedicated blocking task. The async side
//! receives finished lines over a channel and can be closed at any time through
//! a [`reader::SerialCloser`], which ends the sequence instead of raising an
//! error.

pub mod line_codec;
pub mod reader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted per-read timeout; a pending read delays shutdown by up to this much
pub const MAX_READ_TIMEOUT_MS: u64 = 5000;

/// Serial device settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud_rate: u32,
    /// Wait after opening before the first read
    pub settle_ms: u64,
    /// Per-read timeout; bounds how long a pending read ignores `close()`
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            settle_ms: 2000,
            read_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to read from serial port: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to list serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
}

/// Prints the serial ports known to the system.
pub fn list_ports() -> Result<(), SerialError> {
    let ports = serialport::available_ports().map_err(SerialError::Enumerate)?;

    println!("Available serial ports:");
    if ports.is_empty() {
        println!("  (none)");
    }
    for port in ports {
        match &port.port_type {
            serialport::SerialPortType::UsbPort(info) => {
                println!(
                    "  {} - USB (VID: 0x{:04x}, PID: 0x{:04x})",
                    port.port_name, info.vid, info.pid
                );
                if let Some(product) = &info.product {
                    println!("      Product: {}", product);
                }
            }
            serialport::SerialPortType::BluetoothPort => {
                println!("  {} - Bluetooth", port.port_name)
            }
            serialport::SerialPortType::PciPort => println!("  {} - PCI", port.port_name),
            serialport::SerialPortType::Unknown => println!("  {}", port.port_name),
        }
    }
    Ok(())
}
