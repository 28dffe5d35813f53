//! Command dispatcher
//!
//! Serialises command execution against the single open transport. Access is
//! guarded by a `tokio::sync::Mutex`, which hands the lock out in the order
//! waiters queued, so commands run in submission order and never overlap.
//!
//! Each command runs the same cycle under the lock:
//! 1. discard unread input left over from earlier output
//! 2. write the command text plus newline
//! 3. sleep the command's wait window
//! 4. collect whatever lines arrived
//!
//! A silent device yields an empty response; the wait window is the timeout.
//! I/O failures surface as [`TransportError`] and are never retried.

use super::link::close_gracefully;
use super::LineTransport;
use crate::firmware::Command;
use motorkit_core::{thread_safe, EventDispatcher, LogLine, ThreadSafe, TransportError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Lines captured during one command's wait window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Dispatch sequence number
    pub seq: u64,
    /// Wire text of the command
    pub command: String,
    /// Reply lines, trimmed, in arrival order
    pub lines: Vec<String>,
}

impl Response {
    /// True when the device said nothing
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Commands written to the wire
    pub commands_sent: u64,
    /// Reply lines collected
    pub lines_received: u64,
    /// Stale lines thrown away before a write
    pub stale_discarded: u64,
    /// Commands that failed with an I/O error
    pub transport_errors: u64,
    /// Commands dropped because the link was torn down first
    pub cancelled: u64,
}

struct Attached {
    epoch: u64,
    transport: Box<dyn LineTransport>,
}

type Link = Option<Attached>;

/// Serialises commands onto the shared transport
#[derive(Clone)]
pub struct CommandDispatcher {
    link: Arc<Mutex<Link>>,
    epoch: Arc<AtomicU64>,
    seq: Arc<AtomicU64>,
    stats: ThreadSafe<DispatchStats>,
    events: EventDispatcher,
}

impl CommandDispatcher {
    /// Create a dispatcher with no transport attached
    pub fn new(events: EventDispatcher) -> Self {
        Self {
            link: Arc::new(Mutex::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
            seq: Arc::new(AtomicU64::new(0)),
            stats: thread_safe(DispatchStats::default()),
            events,
        }
    }

    /// Current link epoch. Bumped by every [`detach`](Self::detach).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }

    /// Install an opened transport
    ///
    /// `epoch` is the value of [`epoch`](Self::epoch) read when the open
    /// began. If a detach happened since, the transport is handed back
    /// unattached so the caller can close it.
    pub async fn attach(
        &self,
        transport: Box<dyn LineTransport>,
        epoch: u64,
    ) -> Result<(), Box<dyn LineTransport>> {
        let mut link = self.link.lock().await;
        if self.epoch() != epoch {
            tracing::info!("Dropping {}: link torn down while opening", transport.name());
            return Err(transport);
        }
        if let Some(previous) = link.replace(Attached { epoch, transport }) {
            tracing::warn!("Replacing attached transport {}", previous.transport.name());
            close_gracefully(previous.transport, None, &self.events).await;
        }
        Ok(())
    }

    /// Run one command and return the lines captured in its wait window
    ///
    /// The command is bound to the current link when this is called: a
    /// [`detach`](Self::detach) before it reaches the wire cancels it.
    /// Callers are served in the order their futures first poll.
    pub fn submit(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send + 'static {
        self.submit_at(self.epoch(), command)
    }

    /// Run one command on the link of `epoch`
    ///
    /// Like [`submit`](Self::submit), but bound to an epoch read earlier, so
    /// a multi-step sequence stays on the link it started on. Once that link
    /// is detached every later step is cancelled.
    pub fn submit_at(
        &self,
        epoch: u64,
        command: &Command,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send + 'static {
        let text = command.text();
        let wait = command.wait();
        let this = self.clone();
        async move { this.run(epoch, text, wait).await }
    }

    async fn run(
        &self,
        epoch: u64,
        text: String,
        wait: Duration,
    ) -> Result<Response, TransportError> {
        let mut link = self.link.lock().await;

        if self.epoch() != epoch {
            self.stats.lock().cancelled += 1;
            tracing::debug!("Cancelled '{}': link closed while queued", text);
            return Err(TransportError::Cancelled { command: text });
        }

        let attached = link.as_mut().ok_or(TransportError::NotConnected)?;

        let result = self.exchange(attached.transport.as_mut(), &text, wait).await;
        match &result {
            Ok(response) => {
                let mut stats = self.stats.lock();
                stats.commands_sent += 1;
                stats.lines_received += response.lines.len() as u64;
            }
            Err(e) => {
                self.stats.lock().transport_errors += 1;
                tracing::error!("Transport error on '{}': {}", text, e);
                self.events.log(LogLine::Error(e.to_string()));
            }
        }
        result
    }

    async fn exchange(
        &self,
        transport: &mut dyn LineTransport,
        text: &str,
        wait: Duration,
    ) -> Result<Response, TransportError> {
        let stale = transport.discard_input().map_err(|e| TransportError::read(&e))?;
        if !stale.is_empty() {
            self.stats.lock().stale_discarded += stale.len() as u64;
            for line in stale {
                tracing::trace!("stale: {}", line);
                self.events.log(LogLine::Stale(line));
            }
        }

        transport
            .write_line(text)
            .map_err(|e| TransportError::write(text, &e))?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("TX[{}]: {}", seq, text);
        self.events.log(LogLine::Sent(text.to_string()));

        tokio::time::sleep(wait).await;

        let lines = transport
            .read_available()
            .map_err(|e| TransportError::read(&e))?;
        for line in &lines {
            tracing::debug!("RX[{}]: {}", seq, line);
            self.events.log(LogLine::Received(line.clone()));
        }

        Ok(Response {
            seq,
            command: text.to_string(),
            lines,
        })
    }

    /// Tear the link down
    ///
    /// Commands still queued are cancelled as soon as this is called, without
    /// touching the wire. The returned future waits for the command in
    /// flight, if any, to finish its wait window, then sends `farewell` and
    /// closes the transport; failures there are logged only. A transport
    /// attached after this call is left alone. Resolves to whether a
    /// transport was closed.
    pub fn detach(
        &self,
        farewell: Option<(String, Duration)>,
    ) -> impl Future<Output = bool> + Send + 'static {
        let cutoff = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let link = self.link.clone();
        let events = self.events.clone();
        async move {
            let mut link = link.lock().await;
            if !matches!(link.as_ref(), Some(attached) if attached.epoch < cutoff) {
                return false;
            }
            match link.take() {
                Some(attached) => {
                    let farewell = farewell.as_ref().map(|(text, wait)| (text.as_str(), *wait));
                    close_gracefully(attached.transport, farewell, &events).await;
                    true
                }
                None => false,
            }
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("epoch", &self.epoch())
            .field("stats", &self.stats())
            .finish()
    }
}
