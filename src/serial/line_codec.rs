//! Splits the raw serial byte stream into trimmed text lines.

use tracing::warn;

/// Longest line kept before the partial buffer is dropped as noise
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates bytes until a line terminator shows up.
///
/// Both `\n` and `\r\n` end a line. Lines are decoded lossily, trimmed, and
/// dropped when nothing is left.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Feeds a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
                continue;
            }

            if self.pending.len() >= MAX_LINE_BYTES {
                warn!(
                    "Discarding {} bytes of serial input without line terminator",
                    self.pending.len()
                );
                self.pending.clear();
            }
            self.pending.push(byte);
        }
        lines
    }

    /// Flushes an unterminated trailing line at end of stream.
    pub fn finish(mut self) -> Option<String> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
