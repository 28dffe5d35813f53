//! Command vocabulary of the controller's admin test mode and the wait
//! policy that decides how long each command's reply window lasts.

use motorkit_core::Axis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Slowest speed the firmware accepts
pub const MIN_SPEED_RPM: u32 = 1;
/// Fastest speed the firmware accepts
pub const MAX_SPEED_RPM: u32 = 15;

/// A command understood by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotorCommand {
    /// `r`: drop back to the idle state
    EnterIdle,
    /// `admin`: enter the privileged test mode
    EnterTestMode,
    /// `imu`: initialise the IMU
    InitImu,
    /// `munlock`: disable software position limits
    UnlockLimits,
    /// `mpos`: report positions
    QueryPositions,
    /// `m<n> <steps>`: relative move; steps are already in wire convention
    Move {
        /// Axis to move
        axis: Axis,
        /// Wire-convention step count
        steps: i64,
    },
    /// `mreset` or `mreset <n>`: zero the position counters
    ResetPositions {
        /// Axis to reset, both when `None`
        axis: Option<Axis>,
    },
    /// `mstop`: stop and release all motors
    StopMotors,
    /// `mspeed <rpm>`
    SetSpeed {
        /// Speed in RPM
        rpm: u32,
    },
    /// `exit`: leave test mode
    ExitTestMode,
    /// Anything else, sent verbatim
    Raw(String),
}

impl MotorCommand {
    /// Text written to the wire, without the line delimiter
    pub fn wire_text(&self) -> String {
        match self {
            MotorCommand::EnterIdle => "r".to_string(),
            MotorCommand::EnterTestMode => "admin".to_string(),
            MotorCommand::InitImu => "imu".to_string(),
            MotorCommand::UnlockLimits => "munlock".to_string(),
            MotorCommand::QueryPositions => "mpos".to_string(),
            MotorCommand::Move { axis, steps } => format!("m{} {}", axis.number(), steps),
            MotorCommand::ResetPositions { axis: None } => "mreset".to_string(),
            MotorCommand::ResetPositions { axis: Some(axis) } => {
                format!("mreset {}", axis.number())
            }
            MotorCommand::StopMotors => "mstop".to_string(),
            MotorCommand::SetSpeed { rpm } => format!("mspeed {}", rpm),
            MotorCommand::ExitTestMode => "exit".to_string(),
            MotorCommand::Raw(text) => text.trim().to_string(),
        }
    }
}

impl fmt::Display for MotorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_text())
    }
}

/// How long to listen for a reply after each command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Default reply window
    pub base: Duration,
    /// Time per step of travel for moves
    pub per_step: Duration,
    /// Window for entering test mode
    pub privileged: Duration,
    /// Window for IMU initialisation
    pub imu_init: Duration,
}

impl WaitPolicy {
    /// Policy with every window zero, for tests against in-process devices
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            per_step: Duration::ZERO,
            privileged: Duration::ZERO,
            imu_init: Duration::ZERO,
        }
    }

    /// `max(base, |steps| * per_step)`
    pub fn move_wait(&self, steps: i64) -> Duration {
        let steps = u32::try_from(steps.unsigned_abs()).unwrap_or(u32::MAX);
        self.base.max(self.per_step.saturating_mul(steps))
    }

    /// Reply window for `command`
    pub fn wait_for(&self, command: &MotorCommand) -> Duration {
        match command {
            MotorCommand::EnterTestMode => self.privileged,
            MotorCommand::InitImu => self.imu_init,
            MotorCommand::Move { steps, .. } => self.move_wait(*steps),
            _ => self.base,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            per_step: Duration::from_millis(3),
            privileged: Duration::from_millis(1000),
            imu_init: Duration::from_millis(2000),
        }
    }
}

/// What the completion path does with a command's response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Log only
    None,
    /// Last step of the connect sequence: expects a position report
    VerifyConnect,
    /// A move went out; `steps` is in user convention
    ApplyMove {
        /// Axis moved
        axis: Axis,
        /// User-convention step count
        steps: i64,
    },
    /// Zero the tracker once the reset is acknowledged
    ConfirmReset {
        /// Axis reset, both when `None`
        axis: Option<Axis>,
    },
    /// Position query that replaces tracked positions
    Resync,
}

/// A queued command: payload, reply window, and what to do with the reply
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    payload: MotorCommand,
    wait: Duration,
    continuation: Continuation,
}

impl Command {
    /// Build a command with the policy's wait for its payload
    pub fn new(payload: MotorCommand, policy: &WaitPolicy) -> Self {
        let wait = policy.wait_for(&payload);
        Self {
            payload,
            wait,
            continuation: Continuation::None,
        }
    }

    /// Build a command with an explicit wait
    pub fn with_wait(payload: MotorCommand, wait: Duration) -> Self {
        Self {
            payload,
            wait,
            continuation: Continuation::None,
        }
    }

    /// Attach a continuation
    pub fn then(mut self, continuation: Continuation) -> Self {
        self.continuation = continuation;
        self
    }

    /// Reply window
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Follow-up on completion
    pub fn continuation(&self) -> Continuation {
        self.continuation
    }

    /// Wire text
    pub fn text(&self) -> String {
        self.payload.wire_text()
    }
}
