//! Controller firmware protocol: the admin test-mode command set and the
//! parser for its replies.

pub mod commands;
pub mod response_parser;

pub use commands::{Command, Continuation, MotorCommand, WaitPolicy, MAX_SPEED_RPM, MIN_SPEED_RPM};
pub use response_parser::{DeviceReport, ParsedResponse, ReportPattern, ResponseParser};
