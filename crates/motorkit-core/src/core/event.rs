//! Event system for link activity
//!
//! Provides:
//! - Event types for link state, positions, and serial log lines
//! - Event dispatcher for publishing events to subscribers

use crate::data::LinkState;
use tokio::sync::broadcast;

/// One entry for the serial log panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    /// Command written to the device
    Sent(String),
    /// Line read back during a command window
    Received(String),
    /// Line drained during the boot settle window
    Boot(String),
    /// Unread line discarded before a command
    Stale(String),
    /// Local note
    Note(String),
    /// Failure
    Error(String),
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLine::Sent(cmd) => write!(f, ">> {}", cmd),
            LogLine::Received(line) => write!(f, "<< {}", line),
            LogLine::Boot(line) => write!(f, "boot: {}", line),
            LogLine::Stale(line) => write!(f, "stale: {}", line),
            LogLine::Note(msg) => write!(f, "{}", msg),
            LogLine::Error(msg) => write!(f, "ERROR: {}", msg),
        }
    }
}

/// Controller event types
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Link state changed
    StateChanged(LinkState),
    /// Serial log entry
    Log(LogLine),
    /// Tracked positions changed (user convention)
    PositionsChanged {
        /// Axis 1 position
        m1: i64,
        /// Axis 2 position
        m2: i64,
    },
    /// Soft warning, e.g. an expected report never arrived
    Warning(String),
    /// Error surfaced to the operator
    Error(String),
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerEvent::StateChanged(state) => write!(f, "State: {}", state),
            ControllerEvent::Log(line) => write!(f, "{}", line),
            ControllerEvent::PositionsChanged { m1, m2 } => {
                write!(f, "Positions - M1:{} M2:{}", m1, m2)
            }
            ControllerEvent::Warning(msg) => write!(f, "WARNING: {}", msg),
            ControllerEvent::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for controller events.
    tx: broadcast::Sender<ControllerEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 256)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Create a new event dispatcher with default buffer size
    pub fn default_with_buffer() -> Self {
        Self::new(256)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(
        &self,
        event: ControllerEvent,
    ) -> Result<usize, broadcast::error::SendError<ControllerEvent>> {
        self.tx.send(event)
    }

    /// Publish a serial log entry, ignoring the case where nobody listens
    pub fn log(&self, line: LogLine) {
        let _ = self.publish(ControllerEvent::Log(line));
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::default_with_buffer()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
