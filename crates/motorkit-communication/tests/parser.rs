//! Response parser robustness

use motorkit_communication::{DeviceReport, ReportPattern, ResponseParser};
use proptest::prelude::*;

#[test]
fn test_positions_from_mixed_output() {
    let lines = [
        "Moving motor 1 by 120 steps...",
        "Done.",
        "[MPOS] M1:120 M2:-45",
        "Type 'help' for menu.",
    ];
    let parsed = ResponseParser::parse(&lines, ReportPattern::Positions);
    assert_eq!(parsed.positions(), Some((120, -45)));
    assert_eq!(parsed.reports.len(), 1);
}

#[test]
fn test_diagnostic_line_yields_nothing() {
    let parsed = ResponseParser::parse_all(&["Initializing IMU..."]);
    assert!(parsed.reports.is_empty());
    assert!(parsed.errors.is_empty());
}

#[test]
fn test_overflowing_value_is_line_error() {
    let parsed = ResponseParser::parse_all(&["[MPOS] M1:99999999999999999999 M2:0"]);
    assert!(parsed.reports.is_empty());
    assert_eq!(parsed.errors.len(), 1);
}

proptest! {
    #[test]
    fn parse_never_panics(lines in prop::collection::vec(".*", 0..8)) {
        let _ = ResponseParser::parse_all(&lines);
    }

    #[test]
    fn tagged_noise_never_panics(body in "[ -~]{0,40}") {
        let line = format!("[MPOS] {}", body);
        let _ = ResponseParser::parse_line(&line);
    }

    #[test]
    fn well_formed_positions_round_trip(m1 in any::<i64>(), m2 in any::<i64>()) {
        let line = format!("[MPOS] M1:{} M2:{} MIN:-2048 MAX:2048", m1, m2);
        prop_assert_eq!(
            ResponseParser::parse_line(&line).unwrap(),
            Some(DeviceReport::AxisPositions { m1, m2, min: Some(-2048), max: Some(2048) })
        );
    }
}
