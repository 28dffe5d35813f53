//! Line-oriented transport layer
//!
//! A transport moves newline-delimited text to and from the controller.
//! Everything above it (dispatcher, session) sees only whole, trimmed lines.

pub mod dispatcher;
pub mod link;
pub mod serial;
pub mod simulated;

use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;

/// Serial parity setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Boot/banner drain performed right after the port opens
///
/// The controller resets when the port opens and prints a banner. The
/// output is read and discarded in two consecutive windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSettle {
    /// First drain window
    pub first: Duration,
    /// Second drain window
    pub second: Duration,
}

impl BootSettle {
    /// No settle at all, for transports that do not reset on open
    pub fn none() -> Self {
        Self {
            first: Duration::ZERO,
            second: Duration::ZERO,
        }
    }

    /// Total time spent draining
    pub fn total(&self) -> Duration {
        self.first + self.second
    }
}

impl Default for BootSettle {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(3000),
            second: Duration::from_millis(500),
        }
    }
}

/// Connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port name (e.g. "COM4", "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1-2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Per-read timeout in milliseconds
    pub timeout_ms: u64,
    /// Boot drain windows
    pub boot_settle: BootSettle,
}

impl ConnectionParams {
    /// Parameters for a port with the default 115200 8-N-1 settings
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the boot drain windows
    pub fn with_boot_settle(mut self, boot_settle: BootSettle) -> Self {
        self.boot_settle = boot_settle;
        self
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            timeout_ms: 10,
            boot_settle: BootSettle::default(),
        }
    }
}

/// An open, line-oriented link to the controller
///
/// Implementations are blocking and must not wait for data: `read_available`
/// returns whatever complete lines are already buffered, possibly none.
pub trait LineTransport: Send {
    /// Name of the underlying port
    fn name(&self) -> &str;

    /// Write `text` followed by a newline
    fn write_line(&mut self, text: &str) -> io::Result<()>;

    /// Return every complete line currently available, trimmed, blank lines
    /// dropped
    fn read_available(&mut self) -> io::Result<Vec<String>>;

    /// Discard unread input, returning what was thrown away
    fn discard_input(&mut self) -> io::Result<Vec<String>> {
        self.read_available()
    }

    /// Release the port
    fn close(&mut self) -> io::Result<()>;
}

/// Splits a byte stream into lines
///
/// Invalid UTF-8 is replaced, carriage returns and surrounding whitespace are
/// trimmed, and blank lines are dropped. A trailing partial line is held
/// until its newline arrives.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and return the lines they completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    /// Bytes held back waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial line
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_and_trims() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"[MPOS] M1:1 M2:2\r\n\r\nDone.\n");
        assert_eq!(lines, vec!["[MPOS] M1:1 M2:2", "Done."]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"[MPOS] M1:").is_empty());
        assert_eq!(buffer.pending_len(), 10);
        let lines = buffer.push(b"5 M2:6\n");
        assert_eq!(lines, vec!["[MPOS] M1:5 M2:6"]);
    }

    #[test]
    fn test_line_buffer_replaces_invalid_utf8() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"boot \xff\xfe ok\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("boot "));
        assert!(lines[0].ends_with(" ok"));
        assert!(lines[0].contains('\u{FFFD}'));
    }

    #[test]
    fn test_default_params() {
        let params = ConnectionParams::for_port("COM4");
        assert_eq!(params.port, "COM4");
        assert_eq!(params.baud_rate, 115200);
        assert_eq!(params.data_bits, 8);
        assert_eq!(params.stop_bits, 1);
        assert_eq!(params.parity, SerialParity::None);
        assert_eq!(params.boot_settle.total(), Duration::from_millis(3500));
    }
}
