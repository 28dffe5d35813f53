//! Link lifecycle: opening a transport, draining the boot banner, and the
//! graceful shutdown on close.

use super::serial::SerialTransport;
use super::simulated::SimulatedDevice;
use super::{BootSettle, ConnectionParams, LineTransport};
use motorkit_core::{ConnectionError, EventDispatcher, LogLine};
use std::time::Duration;

/// Opens transports for the session
///
/// The session only ever sees a boxed [`LineTransport`]; which kind of port
/// backs it is decided here.
pub trait Connector: Send + Sync {
    /// Open a transport. Does not drain the boot banner.
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn LineTransport>, ConnectionError>;
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn LineTransport>, ConnectionError> {
        Ok(Box::new(SerialTransport::open(params)?))
    }
}

/// Opens transports onto a [`SimulatedDevice`]
#[derive(Debug, Default, Clone)]
pub struct SimulatedConnector {
    device: SimulatedDevice,
}

impl SimulatedConnector {
    /// Connector for the given simulated device
    pub fn new(device: SimulatedDevice) -> Self {
        Self { device }
    }

    /// The device behind this connector
    pub fn device(&self) -> &SimulatedDevice {
        &self.device
    }
}

impl Connector for SimulatedConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn LineTransport>, ConnectionError> {
        if params.port.is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "no port given".to_string(),
            });
        }
        tracing::info!("Opened simulated port {}", params.port);
        Ok(Box::new(self.device.open(params.port.clone())))
    }
}

/// Read and discard boot output in two settle windows
///
/// Each drained line is published as a `boot:` log entry. A read failure ends
/// the drain early; the port is still handed over and the first command will
/// surface the problem.
pub async fn drain_boot(
    transport: &mut dyn LineTransport,
    settle: BootSettle,
    events: &EventDispatcher,
) -> usize {
    let mut drained = 0;
    for window in [settle.first, settle.second] {
        if !window.is_zero() {
            tokio::time::sleep(window).await;
        }
        match transport.read_available() {
            Ok(lines) => {
                drained += lines.len();
                for line in lines {
                    tracing::debug!("boot: {}", line);
                    events.log(LogLine::Boot(line));
                }
            }
            Err(e) => {
                tracing::warn!("Boot drain on {} failed: {}", transport.name(), e);
                break;
            }
        }
    }
    drained
}

/// Send `farewell`, wait, then release the port
///
/// Failures are logged and swallowed; the handle is released either way.
pub async fn close_gracefully(
    mut transport: Box<dyn LineTransport>,
    farewell: Option<(&str, Duration)>,
    events: &EventDispatcher,
) {
    let name = transport.name().to_string();

    if let Some((text, wait)) = farewell {
        match transport.write_line(text) {
            Ok(()) => {
                tracing::debug!("TX: {}", text);
                events.log(LogLine::Sent(text.to_string()));
                tokio::time::sleep(wait).await;
                match transport.read_available() {
                    Ok(lines) => {
                        for line in lines {
                            tracing::debug!("RX: {}", line);
                            events.log(LogLine::Received(line));
                        }
                    }
                    Err(e) => tracing::warn!("Read during shutdown of {} failed: {}", name, e),
                }
            }
            Err(e) => tracing::warn!("Shutdown command on {} failed: {}", name, e),
        }
    }

    if let Err(e) = transport.close() {
        tracing::warn!("Closing {} failed: {}", name, e);
    }
    tracing::info!("Link to {} closed", name);
}
