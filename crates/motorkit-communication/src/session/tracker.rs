//! Position/limit tracker
//!
//! Client-side mirror of each axis's position and recorded limits. All
//! values are in the user convention; mirrored-axis conversion happens
//! before anything reaches the tracker.
//!
//! Writes happen only on the session's completion path. Everything else
//! reads through a [`TrackerView`].

use motorkit_core::{thread_safe_rw, Axis, AxisState, LimitKind, ThreadSafeRw};
use std::fmt;

/// Two-axis position and limit model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionTracker {
    axes: [AxisState; 2],
    confirmed: bool,
}

impl PositionTracker {
    /// Create a tracker at the origin with no limits
    pub fn new() -> Self {
        Self::default()
    }

    /// State of one axis
    pub fn axis(&self, axis: Axis) -> AxisState {
        self.axes[axis.index()]
    }

    /// Positions of both axes
    pub fn positions(&self) -> (i64, i64) {
        (self.axes[0].position, self.axes[1].position)
    }

    /// True once a position report has confirmed the tracked values
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Add a commanded delta without device confirmation
    pub fn apply_optimistic_move(&mut self, axis: Axis, signed_steps: i64) -> i64 {
        let state = &mut self.axes[axis.index()];
        state.position = state.position.saturating_add(signed_steps);
        state.position
    }

    /// Replace one axis's position with a device-reported absolute value
    pub fn apply_parsed_report(&mut self, axis: Axis, absolute_position: i64) {
        self.axes[axis.index()].position = absolute_position;
        self.confirmed = true;
    }

    /// Replace both positions from a position report
    pub fn apply_positions(&mut self, m1: i64, m2: i64) {
        self.apply_parsed_report(Axis::One, m1);
        self.apply_parsed_report(Axis::Two, m2);
    }

    /// Flag the tracked positions as unconfirmed
    pub fn mark_unconfirmed(&mut self) {
        self.confirmed = false;
    }

    /// Record the current position as the named limit
    pub fn set_limit(&mut self, axis: Axis, which: LimitKind) -> i64 {
        let state = &mut self.axes[axis.index()];
        let value = state.position;
        match which {
            LimitKind::In => state.in_limit = Some(value),
            LimitKind::Out => state.out_limit = Some(value),
        }
        value
    }

    /// Zero one axis, or both when `axis` is `None`. Limits are kept.
    pub fn reset_positions(&mut self, axis: Option<Axis>) {
        match axis {
            Some(axis) => self.axes[axis.index()].position = 0,
            None => {
                for state in &mut self.axes {
                    state.position = 0;
                }
            }
        }
    }

    /// Start of a new connection: positions back to 0, unconfirmed
    pub fn begin_session(&mut self) {
        self.reset_positions(None);
        self.confirmed = false;
    }

    /// Limits summary for the presentation layer
    pub fn summary(&self) -> LimitsSummary {
        LimitsSummary { axes: self.axes }
    }
}

/// Recorded limits of both axes and their overall bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitsSummary {
    axes: [AxisState; 2],
}

impl LimitsSummary {
    /// Every recorded limit value
    fn recorded(&self) -> impl Iterator<Item = i64> + '_ {
        self.axes
            .iter()
            .flat_map(|a| [a.in_limit, a.out_limit])
            .flatten()
    }

    /// Smallest recorded limit across both axes
    pub fn overall_min(&self) -> Option<i64> {
        self.recorded().min()
    }

    /// Largest recorded limit across both axes
    pub fn overall_max(&self) -> Option<i64> {
        self.recorded().max()
    }

    /// Recorded limit of one axis
    pub fn limit(&self, axis: Axis, which: LimitKind) -> Option<i64> {
        self.axes[axis.index()].limit(which)
    }
}

struct LimitCell(Option<i64>);

impl fmt::Display for LimitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "--"),
        }
    }
}

impl fmt::Display for LimitsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in Axis::ALL {
            let state = self.axes[axis.index()];
            if axis != Axis::One {
                writeln!(f)?;
            }
            write!(
                f,
                "M{}: IN={}  OUT={}",
                axis.number(),
                LimitCell(state.in_limit),
                LimitCell(state.out_limit)
            )?;
        }

        if let (Some(min), Some(max)) = (self.overall_min(), self.overall_max()) {
            writeln!(f)?;
            writeln!(f)?;
            writeln!(f, "// config.h values:")?;
            writeln!(f, "#define MOTOR_MIN_POSITION {}", min)?;
            write!(f, "#define MOTOR_MAX_POSITION {}", max)?;
        }
        Ok(())
    }
}

/// Shared tracker storage owned by the session
pub type TrackerHandle = ThreadSafeRw<PositionTracker>;

/// Create shared tracker storage
pub fn tracker_handle() -> TrackerHandle {
    thread_safe_rw(PositionTracker::new())
}

/// Read-only access to the session's tracker
#[derive(Debug, Clone)]
pub struct TrackerView {
    inner: TrackerHandle,
}

impl TrackerView {
    pub(crate) fn new(inner: TrackerHandle) -> Self {
        Self { inner }
    }

    /// Copy of the current tracker state
    pub fn snapshot(&self) -> PositionTracker {
        self.inner.read().clone()
    }

    /// Positions of both axes
    pub fn positions(&self) -> (i64, i64) {
        self.inner.read().positions()
    }

    /// State of one axis
    pub fn axis(&self, axis: Axis) -> AxisState {
        self.inner.read().axis(axis)
    }

    /// Limits summary
    pub fn summary(&self) -> LimitsSummary {
        self.inner.read().summary()
    }
}
