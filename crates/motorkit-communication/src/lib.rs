//! # MotorKit Communication
//!
//! Serial link to the two-axis motor controller: transports, the command
//! dispatcher, the firmware command set and reply parser, and the operator
//! session that keeps a client-side mirror of axis positions and limits.

pub mod communication;
pub mod firmware;
pub mod session;

pub use communication::{
    dispatcher::{CommandDispatcher, DispatchStats, Response},
    link::{Connector, SerialConnector, SimulatedConnector},
    serial::{list_ports, SerialPortInfo, SerialTransport},
    simulated::{SimulatedDevice, SimulatedState, SimulatedTransport},
    BootSettle, ConnectionParams, LineBuffer, LineTransport, SerialParity,
};

pub use firmware::{
    Command, Continuation, DeviceReport, MotorCommand, ParsedResponse, ReportPattern,
    ResponseParser, WaitPolicy,
};

pub use session::{
    Completion, CompletionKind, CompletionReceiver, LimitsSummary, MotorSession,
    PositionTracker, SessionOptions, TrackerView,
};
