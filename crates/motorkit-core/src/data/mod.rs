//! Data model for the two-axis motor rig
//!
//! Provides:
//! - Axis identifiers and per-axis tracked state
//! - Limit kinds (IN / OUT)
//! - Axis orientation and the user/wire sign conversion
//! - Link state machine states

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two independently driven stepper motors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    /// Motor 1 (left back)
    One,
    /// Motor 2 (right back)
    Two,
}

impl Axis {
    /// Both axes, in wire order
    pub const ALL: [Axis; 2] = [Axis::One, Axis::Two];

    /// Motor number used on the wire (`m1`, `M1:`)
    pub fn number(self) -> u8 {
        match self {
            Axis::One => 1,
            Axis::Two => 2,
        }
    }

    /// Look up an axis by its motor number
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Axis::One),
            2 => Some(Axis::Two),
            _ => None,
        }
    }

    /// Slot of this axis in per-axis arrays
    pub fn index(self) -> usize {
        match self {
            Axis::One => 0,
            Axis::Two => 1,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.number())
    }
}

/// Requested travel direction, in the user-facing convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Towards larger positions
    Forward,
    /// Towards smaller positions
    Reverse,
}

impl Direction {
    /// Apply this direction to an unsigned step amount
    pub fn apply(self, amount: i64) -> i64 {
        match self {
            Direction::Forward => amount,
            Direction::Reverse => -amount,
        }
    }
}

/// Which travel extreme a limit marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitKind {
    /// Minimum travel
    In,
    /// Maximum travel
    Out,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::In => write!(f, "IN"),
            LimitKind::Out => write!(f, "OUT"),
        }
    }
}

/// Last known position and recorded limits for one axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisState {
    /// Position in steps, user convention
    pub position: i64,
    /// Recorded IN (minimum) limit
    pub in_limit: Option<i64>,
    /// Recorded OUT (maximum) limit
    pub out_limit: Option<i64>,
}

impl AxisState {
    /// Recorded limit of the given kind
    pub fn limit(&self, kind: LimitKind) -> Option<i64> {
        match kind {
            LimitKind::In => self.in_limit,
            LimitKind::Out => self.out_limit,
        }
    }
}

/// Mounting orientation of an axis relative to the shared user convention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Wire steps and user steps agree
    #[default]
    Normal,
    /// Lead screw runs the other way: wire steps are negated
    Mirrored,
}

impl Orientation {
    fn sign(self) -> i64 {
        match self {
            Orientation::Normal => 1,
            Orientation::Mirrored => -1,
        }
    }
}

/// Orientation of both axes
///
/// Owns the only sign conversion between requested direction and wire
/// command. Tracked positions never see a mirrored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisOrientation {
    axes: [Orientation; 2],
}

impl AxisOrientation {
    /// Both axes in the normal orientation
    pub fn normal() -> Self {
        Self::default()
    }

    /// Mirror a single axis
    pub fn mirrored(axis: Axis) -> Self {
        Self::default().with(axis, Orientation::Mirrored)
    }

    /// Set the orientation for one axis
    pub fn with(mut self, axis: Axis, orientation: Orientation) -> Self {
        self.axes[axis.index()] = orientation;
        self
    }

    /// Orientation of one axis
    pub fn of(&self, axis: Axis) -> Orientation {
        self.axes[axis.index()]
    }

    /// Convert a user-convention step count to the value written on the wire
    pub fn to_wire(&self, axis: Axis, steps: i64) -> i64 {
        steps.saturating_mul(self.of(axis).sign())
    }

    /// Convert a value reported by the device to the user convention
    pub fn from_wire(&self, axis: Axis, value: i64) -> i64 {
        value.saturating_mul(self.of(axis).sign())
    }
}

/// How the tracker keeps positions current after a move
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Trust commanded deltas; resync only on connect and reset
    #[default]
    Optimistic,
    /// Query the device for positions after every move
    Requery,
}

/// Connection state machine
///
/// `Disconnected → Connecting → Idle ⇄ Busy → Disconnected`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No link
    #[default]
    Disconnected,
    /// Port opening, boot drain and init sequence running
    Connecting,
    /// Connected, ready for a command
    Idle,
    /// Connected, a command is in flight
    Busy,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Connecting => write!(f, "Connecting"),
            LinkState::Idle => write!(f, "Connected(Idle)"),
            LinkState::Busy => write!(f, "Connected(Busy)"),
        }
    }
}
