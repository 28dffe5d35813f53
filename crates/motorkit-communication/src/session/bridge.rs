//! Result bridge
//!
//! Command tasks never touch session state. They post a [`Completion`] here
//! and the presentation context applies it with
//! [`MotorSession::apply`](super::MotorSession::apply), so every write to the
//! tracker happens on one context.

use crate::communication::dispatcher::Response;
use crate::firmware::Command;
use motorkit_core::{ConnectionError, TransportError};
use tokio::sync::mpsc;

/// What finished
#[derive(Debug)]
pub enum CompletionKind {
    /// Port opened and boot output drained
    Opened {
        /// Port name
        port: String,
    },
    /// Port could not be opened
    ConnectFailed(ConnectionError),
    /// A command ran
    Command {
        /// The command as submitted
        command: Command,
        /// Its response or failure
        outcome: Result<Response, TransportError>,
    },
    /// The link was released
    Closed,
}

/// A finished operation, tagged with the connection generation it belongs to
#[derive(Debug)]
pub struct Completion {
    /// Generation of the connection that issued the work
    pub generation: u64,
    /// Result payload
    pub kind: CompletionKind,
}

/// Sending half, cloned into each command task
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionSender {
    /// Post a completion; dropped silently once the receiver is gone
    pub fn send(&self, generation: u64, kind: CompletionKind) {
        if self.tx.send(Completion { generation, kind }).is_err() {
            tracing::debug!("Completion dropped: presentation context gone");
        }
    }
}

/// Receiving half, owned by the presentation context
#[derive(Debug)]
pub struct CompletionReceiver {
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl CompletionReceiver {
    /// Wait for the next completion
    pub async fn recv(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }

    /// Take a completion if one is ready
    pub fn try_recv(&mut self) -> Option<Completion> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected sender/receiver pair
pub fn channel() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, CompletionReceiver { rx })
}
