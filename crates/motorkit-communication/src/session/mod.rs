//! Operator session: connection state machine, position tracking, and the
//! bridge that carries command results back to the presentation context.

pub mod bridge;
pub mod motor_session;
pub mod tracker;

pub use bridge::{Completion, CompletionKind, CompletionReceiver, CompletionSender};
pub use motor_session::{MotorSession, SessionOptions};
pub use tracker::{LimitsSummary, PositionTracker, TrackerView};
