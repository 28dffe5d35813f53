//! # MotorKit Core
//!
//! Core types, errors, and events for MotorKit.
//! Provides the axis and limit data model, the connection state machine
//! states, and the event dispatcher used to report link activity.

pub mod core;
pub mod data;
pub mod error;
pub mod types;

pub use core::event::{ControllerEvent, EventDispatcher, LogLine};

pub use data::{
    Axis, AxisOrientation, AxisState, Direction, LimitKind, LinkState, Orientation, TrackingMode,
};

pub use error::{ConnectionError, Error, LineParseError, Result, SessionError, TransportError};

pub use types::{thread_safe, thread_safe_rw, ThreadSafe, ThreadSafeRw};
