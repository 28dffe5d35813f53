//! Response parser
//!
//! Maps raw reply lines to structured reports. Each line is tested on its
//! own; lines that match nothing are dropped without error. A line whose tag
//! is recognised but whose numeric fields do not parse yields a
//! [`LineParseError`] for that line only.

use motorkit_core::{Axis, LineParseError};
use regex::Regex;
use std::sync::OnceLock;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[(?P<tag>[A-Z]+)\]\s*(?P<body>.*)$").expect("invalid regex pattern")
    })
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<label>[A-Za-z][A-Za-z0-9]*):(?P<value>\S*)")
            .expect("invalid regex pattern")
    })
}

fn moving_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Moving motor (?P<axis>[12]) by (?P<steps>\S+) steps")
            .expect("invalid regex pattern")
    })
}

fn rejection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(Unknown command|Usage:|Invalid |ERROR:)").expect("invalid regex pattern")
    })
}

/// A structured report extracted from one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceReport {
    /// `[MPOS] M1:<p> M2:<p> MIN:<v> MAX:<v>`, wire convention
    AxisPositions {
        /// Axis 1 position
        m1: i64,
        /// Axis 2 position
        m2: i64,
        /// Firmware minimum, when reported
        min: Option<i64>,
        /// Firmware maximum, when reported
        max: Option<i64>,
    },
    /// `[MRESET] ...`
    PositionReset {
        /// Axis reset, both when `None`
        axis: Option<Axis>,
    },
    /// `Moving motor <n> by <steps> steps...`, wire convention
    MoveStarted {
        /// Axis moving
        axis: Axis,
        /// Wire step count
        steps: i64,
    },
    /// `Done.`
    MoveDone,
    /// The firmware refused the command
    CommandRejected {
        /// The refusal text
        message: String,
    },
}

/// Which reports a caller is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPattern {
    /// Every recognised report
    Any,
    /// Position reports
    Positions,
    /// Reset acknowledgements
    Reset,
    /// Move echo and completion
    Move,
    /// Refusals
    Rejection,
}

impl ReportPattern {
    fn admits_tag(self, tag: &str) -> bool {
        match self {
            ReportPattern::Any => true,
            ReportPattern::Positions => tag == "MPOS",
            ReportPattern::Reset => tag == "MRESET",
            ReportPattern::Move | ReportPattern::Rejection => false,
        }
    }

    fn admits(self, report: &DeviceReport) -> bool {
        match (self, report) {
            (ReportPattern::Any, _) => true,
            (ReportPattern::Positions, DeviceReport::AxisPositions { .. }) => true,
            (ReportPattern::Reset, DeviceReport::PositionReset { .. }) => true,
            (ReportPattern::Move, DeviceReport::MoveStarted { .. } | DeviceReport::MoveDone) => {
                true
            }
            (ReportPattern::Rejection, DeviceReport::CommandRejected { .. }) => true,
            _ => false,
        }
    }
}

/// Reports and per-line errors from one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Reports in line order
    pub reports: Vec<DeviceReport>,
    /// Lines whose tag matched but whose fields were malformed
    pub errors: Vec<LineParseError>,
}

impl ParsedResponse {
    /// Last position report, as (m1, m2) in wire convention
    pub fn positions(&self) -> Option<(i64, i64)> {
        self.reports.iter().rev().find_map(|r| match r {
            DeviceReport::AxisPositions { m1, m2, .. } => Some((*m1, *m2)),
            _ => None,
        })
    }

    /// True when a reset was acknowledged
    pub fn reset_acknowledged(&self) -> bool {
        self.reports
            .iter()
            .any(|r| matches!(r, DeviceReport::PositionReset { .. }))
    }

    /// First refusal message
    pub fn rejection(&self) -> Option<&str> {
        self.reports.iter().find_map(|r| match r {
            DeviceReport::CommandRejected { message } => Some(message.as_str()),
            _ => None,
        })
    }

    /// True when a move was echoed but its `Done.` never arrived
    pub fn move_unfinished(&self) -> bool {
        let started = self
            .reports
            .iter()
            .any(|r| matches!(r, DeviceReport::MoveStarted { .. }));
        started && !self.reports.contains(&DeviceReport::MoveDone)
    }

    /// True when nothing was recognised
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty() && self.errors.is_empty()
    }
}

/// Stateless line parser
pub struct ResponseParser;

impl ResponseParser {
    /// Parse every line, keeping only reports that match `pattern`
    pub fn parse<S: AsRef<str>>(lines: &[S], pattern: ReportPattern) -> ParsedResponse {
        let mut parsed = ParsedResponse::default();
        for line in lines {
            let line = line.as_ref().trim();
            match Self::parse_line(line) {
                Ok(Some(report)) if pattern.admits(&report) => parsed.reports.push(report),
                Ok(_) => {}
                Err(e) => {
                    let tag = tag_regex()
                        .captures(line)
                        .and_then(|c| c.name("tag"))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    if pattern.admits_tag(tag) {
                        parsed.errors.push(e);
                    }
                }
            }
        }
        parsed
    }

    /// Parse every line with [`ReportPattern::Any`]
    pub fn parse_all<S: AsRef<str>>(lines: &[S]) -> ParsedResponse {
        Self::parse(lines, ReportPattern::Any)
    }

    /// Parse one line
    ///
    /// `Ok(None)` for lines that match no known shape.
    pub fn parse_line(line: &str) -> Result<Option<DeviceReport>, LineParseError> {
        let line = line.trim();

        if let Some(caps) = tag_regex().captures(line) {
            let tag = caps.name("tag").map(|m| m.as_str()).unwrap_or("");
            let body = caps.name("body").map(|m| m.as_str()).unwrap_or("");
            return match tag {
                "MPOS" => Self::parse_positions(line, body).map(Some),
                "MRESET" => Self::parse_reset(line, body).map(Some),
                _ => Ok(None),
            };
        }

        if let Some(caps) = moving_regex().captures(line) {
            let axis = caps
                .name("axis")
                .and_then(|m| m.as_str().parse::<u8>().ok())
                .and_then(Axis::from_number);
            let steps = caps.name("steps").map(|m| m.as_str()).unwrap_or("");
            let steps = steps
                .parse::<i64>()
                .map_err(|e| LineParseError::new(line, "steps", e.to_string()))?;
            return Ok(axis.map(|axis| DeviceReport::MoveStarted { axis, steps }));
        }

        if line == "Done." || line == "Done" {
            return Ok(Some(DeviceReport::MoveDone));
        }

        if rejection_regex().is_match(line) {
            return Ok(Some(DeviceReport::CommandRejected {
                message: line.to_string(),
            }));
        }

        Ok(None)
    }

    fn parse_positions(line: &str, body: &str) -> Result<DeviceReport, LineParseError> {
        let mut m1 = None;
        let mut m2 = None;
        let mut min = None;
        let mut max = None;

        for caps in field_regex().captures_iter(body) {
            let label = caps.name("label").map(|m| m.as_str()).unwrap_or("");
            let slot = match label {
                "M1" => &mut m1,
                "M2" => &mut m2,
                "MIN" => &mut min,
                "MAX" => &mut max,
                _ => continue,
            };
            let value = caps.name("value").map(|m| m.as_str()).unwrap_or("");
            let parsed = value
                .parse::<i64>()
                .map_err(|e| LineParseError::new(line, label, e.to_string()))?;
            *slot = Some(parsed);
        }

        let m1 = m1.ok_or_else(|| LineParseError::new(line, "M1", "missing"))?;
        let m2 = m2.ok_or_else(|| LineParseError::new(line, "M2", "missing"))?;
        Ok(DeviceReport::AxisPositions { m1, m2, min, max })
    }

    fn parse_reset(line: &str, body: &str) -> Result<DeviceReport, LineParseError> {
        let mut axis = None;
        for caps in field_regex().captures_iter(body) {
            let label = caps.name("label").map(|m| m.as_str()).unwrap_or("");
            let found = match label {
                "M1" => Axis::One,
                "M2" => Axis::Two,
                _ => continue,
            };
            let value = caps.name("value").map(|m| m.as_str()).unwrap_or("");
            value
                .parse::<i64>()
                .map_err(|e| LineParseError::new(line, label, e.to_string()))?;
            axis = Some(found);
        }
        Ok(DeviceReport::PositionReset { axis })
    }
}
