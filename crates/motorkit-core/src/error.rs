//! Error handling for MotorKit
//!
//! Provides error types for each layer of the serial link:
//! - Connection errors (opening the port)
//! - Transport errors (I/O on an open link)
//! - Line parse errors (a recognised report with malformed fields)
//! - Session errors (operator requests the session cannot honour)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Raised while opening a link. Fatal to the connection attempt and never
/// retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Permission to open the port was denied
    #[error("Permission denied opening {port}")]
    PermissionDenied {
        /// The name of the port.
        port: String,
    },

    /// Port is already in use
    #[error("Port already in use: {port}")]
    PortInUse {
        /// The name of the port that is in use.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Transport error type
///
/// Raised by I/O on an open link. Terminates the current command only; the
/// dispatcher never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No link is attached
    #[error("Link not open")]
    NotConnected,

    /// The command was dropped because the link was torn down before it ran
    #[error("Command cancelled: link closed before '{command}' was sent")]
    Cancelled {
        /// Wire text of the dropped command.
        command: String,
    },

    /// Writing to the link failed
    #[error("Write failed for '{command}': {reason}")]
    WriteFailed {
        /// Wire text of the command being written.
        command: String,
        /// The underlying I/O failure.
        reason: String,
    },

    /// Reading from the link failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The underlying I/O failure.
        reason: String,
    },
}

impl TransportError {
    /// Build a write failure from an I/O error
    pub fn write(command: impl Into<String>, err: &std::io::Error) -> Self {
        TransportError::WriteFailed {
            command: command.into(),
            reason: err.to_string(),
        }
    }

    /// Build a read failure from an I/O error
    pub fn read(err: &std::io::Error) -> Self {
        TransportError::ReadFailed {
            reason: err.to_string(),
        }
    }

    /// True when the command never touched the wire
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled { .. })
    }
}

/// A line carried a recognised tag but one of its fields could not be read.
///
/// Scoped to a single line: the rest of the response still parses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed field {field} in '{line}': {reason}")]
pub struct LineParseError {
    /// The offending line, trimmed.
    pub line: String,
    /// Label of the field that failed.
    pub field: String,
    /// Why the field was rejected.
    pub reason: String,
}

impl LineParseError {
    /// Create a new line parse error
    pub fn new(line: impl Into<String>, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Session error type
///
/// Operator requests rejected before anything reaches the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation needs an open link
    #[error("Not connected")]
    NotConnected,

    /// Connect requested while a link is open or opening
    #[error("Already connected")]
    AlreadyConnected,

    /// Another command is in flight
    #[error("Busy: a command is already in flight")]
    Busy,

    /// Step amount outside the accepted range
    #[error("Step amount {value} outside {min}..={max}")]
    InvalidStepAmount {
        /// The rejected value.
        value: i64,
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },

    /// Motor speed outside the accepted range
    #[error("Motor speed {rpm} RPM outside {min}..={max}")]
    InvalidSpeed {
        /// The rejected speed.
        rpm: u32,
        /// Slowest accepted speed.
        min: u32,
        /// Fastest accepted speed.
        max: u32,
    },

    /// No port selected and none discovered
    #[error("No serial port selected")]
    NoPort,
}

/// Main error type for MotorKit
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Line parse error
    #[error(transparent)]
    Parse(#[from] LineParseError),

    /// Session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
