//! Serial port transport
//!
//! Provides low-level serial port operations for the direct USB link to the
//! controller.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Preferred-port ranking
//! - 8-N-1 framing at a configurable baud rate
//! - Non-blocking line reads

use super::{ConnectionParams, LineBuffer, LineTransport, SerialParity};
use motorkit_core::{ConnectionError, Error, Result};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM4")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }
}

impl From<&serialport::SerialPortInfo> for SerialPortInfo {
    fn from(port: &serialport::SerialPortInfo) -> Self {
        let mut info = SerialPortInfo::new(&port.port_name, "Serial port");
        match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.description = match &usb.product {
                    Some(product) => product.clone(),
                    None => format!("USB serial {:04x}:{:04x}", usb.vid, usb.pid),
                };
                info.manufacturer = usb.manufacturer.clone();
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
            }
            serialport::SerialPortType::BluetoothPort => {
                info.description = "Bluetooth serial".to_string();
            }
            serialport::SerialPortType::PciPort => info.description = "PCI serial".to_string(),
            _ => {}
        }
        info
    }
}

/// Device name prefixes a USB-attached controller shows up under on Linux and macOS
const CONTROLLER_PORT_PREFIXES: &[&str] = &[
    "/dev/ttyUSB",
    "/dev/ttyACM",
    "/dev/cu.usbserial",
    "/dev/cu.usbmodem",
    "/dev/cu.SLAB_USBtoUART",
];

/// Serial ports the controller could be on, with `preferred` moved to the
/// front when it is present
///
/// Windows `COM<n>` ports are always candidates; elsewhere only the USB
/// device names in [`CONTROLLER_PORT_PREFIXES`] are.
pub fn list_ports(preferred: &str) -> Result<Vec<SerialPortInfo>> {
    let found = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;
    let candidates = found
        .iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(SerialPortInfo::from)
        .collect();
    Ok(rank_ports(candidates, preferred))
}

/// Move `preferred` to the front, keeping enumeration order for the rest
fn rank_ports(mut ports: Vec<SerialPortInfo>, preferred: &str) -> Vec<SerialPortInfo> {
    if preferred.is_empty() {
        return ports;
    }
    if let Some(at) = ports.iter().position(|p| p.port_name == preferred) {
        let port = ports.remove(at);
        ports.insert(0, port);
    }
    ports
}

fn is_controller_port(port_name: &str) -> bool {
    match port_name.strip_prefix("COM") {
        Some(number) => !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()),
        None => CONTROLLER_PORT_PREFIXES
            .iter()
            .any(|prefix| port_name.starts_with(prefix)),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

/// Map an open failure onto the connection error taxonomy
fn classify_open_error(port: &str, err: &serialport::Error) -> ConnectionError {
    let reason = err.to_string();
    let lowered = reason.to_lowercase();
    match err.kind() {
        serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
            port: port.to_string(),
        },
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => ConnectionError::PortNotFound {
            port: port.to_string(),
        },
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied)
            if lowered.contains("busy") || lowered.contains("in use") =>
        {
            ConnectionError::PortInUse {
                port: port.to_string(),
            }
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ConnectionError::PermissionDenied {
                port: port.to_string(),
            }
        }
        serialport::ErrorKind::InvalidInput => ConnectionError::InvalidParameters { reason },
        _ if lowered.contains("busy") || lowered.contains("in use") || lowered.contains("access is denied") => {
            ConnectionError::PortInUse {
                port: port.to_string(),
            }
        }
        _ => ConnectionError::FailedToOpen {
            port: port.to_string(),
            reason,
        },
    }
}

/// Serial transport backed by the `serialport` crate
pub struct SerialTransport {
    name: String,
    port: Box<dyn serialport::SerialPort>,
    buffer: LineBuffer,
}

impl SerialTransport {
    /// Open a serial port with the given parameters
    ///
    /// Does not drain the boot banner; see [`super::link::drain_boot`].
    pub fn open(params: &ConnectionParams) -> std::result::Result<Self, ConnectionError> {
        if params.port.is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "no port given".to_string(),
            });
        }

        let data_bits = match params.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("Invalid data bits: {}", other),
                })
            }
        };
        let stop_bits = match params.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("Invalid stop bits: {}", other),
                })
            }
        };

        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(params.parity))
            .flow_control(serialport::FlowControl::None);

        match builder.open() {
            Ok(port) => {
                tracing::info!("Opened serial port {} at {} baud", params.port, params.baud_rate);
                Ok(Self {
                    name: params.port.clone(),
                    port,
                    buffer: LineBuffer::new(),
                })
            }
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                Err(classify_open_error(&params.port, &e))
            }
        }
    }
}

impl LineTransport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.port.write_all(text.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn read_available(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let waiting = self.port.bytes_to_read().map_err(io::Error::from)?;
            if waiting == 0 {
                break;
            }
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => lines.extend(self.buffer.push(&chunk[..n])),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        Ok(lines)
    }

    fn discard_input(&mut self) -> io::Result<Vec<String>> {
        let stale = self.read_available()?;
        self.buffer.clear();
        Ok(stale)
    }

    fn close(&mut self) -> io::Result<()> {
        tracing::info!("Closing serial port {}", self.name);
        self.buffer.clear();
        self.port.flush()
    }
}
