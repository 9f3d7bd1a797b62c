use std::io::{ErrorKind, Read};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::line_codec::LineAssembler;
use super::{SerialConfig, SerialError};

/// Lines buffered between the blocking read task and the forwarding loop
const LINE_CHANNEL_CAPACITY: usize = 64;
const READ_CHUNK: usize = 256;

/// Close handle for a [`SerialReader`].
///
/// Cloneable and safe to use from any task while the reader is blocked in
/// [`SerialReader::next_line`]. Closing twice is harmless.
#[derive(Clone, Debug)]
pub struct SerialCloser {
    token: CancellationToken,
}

impl SerialCloser {
    pub fn close(&self) {
        if !self.token.is_cancelled() {
            debug!("Closing serial port");
            self.token.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Line-oriented view of a serial device.
pub struct SerialReader {
    lines: mpsc::Receiver<Result<String, SerialError>>,
    closer: SerialCloser,
}

impl SerialReader {
    /// Opens the configured device, then waits out the settling delay.
    pub async fn open(config: &SerialConfig) -> Result<Self, SerialError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.read_timeout())
            .open()
            .map_err(|source| SerialError::Open {
                port: config.port.clone(),
                source,
            })?;
        info!("Opened serial port {} at {} baud", config.port, config.baud_rate);

        // Let the device and driver settle; this is a plain wait, not a handshake.
        tokio::time::sleep(config.settle_delay()).await;

        Ok(Self::from_source(port))
    }

    /// Wraps any blocking byte source.
    ///
    /// Read timeouts are retried so the reader notices `close()`. End of
    /// input or any other read error ends the sequence.
    pub fn from_source<R>(source: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let worker_token = token.clone();
        tokio::task::spawn_blocking(move || read_lines(source, tx, worker_token));

        Self {
            lines: rx,
            closer: SerialCloser { token },
        }
    }

    pub fn closer(&self) -> SerialCloser {
        self.closer.clone()
    }

    /// Next trimmed, non-empty line; `None` once the device is closed or the
    /// stream ended.
    pub async fn next_line(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.closer.token.cancelled() => None,
            event = self.lines.recv() => match event {
                Some(Ok(line)) => Some(line),
                Some(Err(e)) => {
                    if self.closer.is_closed() {
                        debug!("Read error after close: {}", e);
                    } else {
                        error!("Error reading serial port: {}", e);
                    }
                    None
                }
                None => None,
            },
        }
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        self.closer.close();
    }
}

fn read_lines<R: Read>(
    mut source: R,
    tx: mpsc::Sender<Result<String, SerialError>>,
    token: CancellationToken,
) {
    let mut assembler = LineAssembler::default();
    let mut chunk = [0u8; READ_CHUNK];

    while !token.is_cancelled() {
        match source.read(&mut chunk) {
            Ok(0) => {
                if let Some(line) = assembler.finish() {
                    let _ = tx.blocking_send(Ok(line));
                }
                debug!("Serial stream reached end of input");
                return;
            }
            Ok(n) => {
                for line in assembler.push(&chunk[..n]) {
                    if tx.blocking_send(Ok(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(SerialError::Read(e)));
                return;
            }
        }
    }
    debug!("Serial read task stopped after close");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    /// Byte source that never produces data, like an idle port with a read timeout.
    struct IdlePort;

    impl Read for IdlePort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(10));
            Err(std::io::Error::new(ErrorKind::TimedOut, "no data"))
        }
    }

    /// Yields its data once, then fails like an unplugged device.
    struct FailingPort {
        data: Option<Vec<u8>>,
    }

    impl Read for FailingPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.data.take() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => Err(std::io::Error::new(ErrorKind::BrokenPipe, "device gone")),
            }
        }
    }

    #[tokio::test]
    async fn yields_trimmed_lines_until_end_of_input() {
        let mut reader = SerialReader::from_source(Cursor::new(b"42\n\n  7 \r\nabc\n19".to_vec()));

        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["42", "7", "abc", "19"]);
    }

    #[tokio::test]
    async fn close_unblocks_pending_read() {
        let mut reader = SerialReader::from_source(IdlePort);
        let closer = reader.closer();

        let pending = tokio::spawn(async move { reader.next_line().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        closer.close();
        closer.close();

        let line = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("close must end the pending read")
            .unwrap();
        assert_eq!(line, None);
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn read_error_ends_sequence() {
        let mut reader = SerialReader::from_source(FailingPort {
            data: Some(b"5\n6\n".to_vec()),
        });

        assert_eq!(reader.next_line().await.as_deref(), Some("5"));
        assert_eq!(reader.next_line().await.as_deref(), Some("6"));
        assert_eq!(reader.next_line().await, None);
        assert_eq!(reader.next_line().await, None);
    }

    #[tokio::test]
    async fn open_fails_for_missing_device() {
        let config = SerialConfig {
            port: "/dev/this-port-does-not-exist".to_string(),
            settle_ms: 0,
            ..SerialConfig::default()
        };
        assert!(matches!(
            SerialReader::open(&config).await,
            Err(SerialError::Open { .. })
        ));
    }
}
