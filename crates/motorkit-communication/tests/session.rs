//! Session state machine against the simulated controller

mod common;

use common::ScriptedTransport;
use motorkit_communication::{
    BootSettle, CompletionReceiver, ConnectionParams, Connector, LineTransport, MotorSession,
    SessionOptions, SimulatedConnector, SimulatedDevice, WaitPolicy,
};
use motorkit_core::{
    Axis, ConnectionError, ControllerEvent, Direction, LimitKind, LinkState, SessionError,
    TrackingMode,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_options() -> SessionOptions {
    SessionOptions {
        params: ConnectionParams::for_port("SIM").with_boot_settle(BootSettle::none()),
        wait: WaitPolicy::immediate(),
        ..SessionOptions::default()
    }
}

fn session_with(
    options: SessionOptions,
    connector: Arc<dyn Connector>,
) -> (MotorSession, CompletionReceiver) {
    MotorSession::new(options, connector, tokio::runtime::Handle::current())
}

fn simulated(options: SessionOptions) -> (MotorSession, CompletionReceiver, SimulatedDevice) {
    let device = SimulatedDevice::new();
    let connector = Arc::new(SimulatedConnector::new(device.clone()));
    let (session, rx) = session_with(options, connector);
    (session, rx, device)
}

/// Apply completions until the session is neither connecting nor busy
async fn settle(session: &mut MotorSession, rx: &mut CompletionReceiver) {
    while matches!(session.state(), LinkState::Connecting | LinkState::Busy) {
        let completion = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for completion")
            .expect("bridge closed");
        session.apply(completion);
    }
}

async fn connected(options: SessionOptions) -> (MotorSession, CompletionReceiver, SimulatedDevice) {
    let (mut session, mut rx, device) = simulated(options);
    session.connect(None).unwrap();
    assert_eq!(session.state(), LinkState::Connecting);
    assert_eq!(session.status(), "Connecting...");
    settle(&mut session, &mut rx).await;
    (session, rx, device)
}

fn warnings(events: &mut tokio::sync::broadcast::Receiver<ControllerEvent>) -> Vec<String> {
    let mut found = Vec::new();
    loop {
        match events.try_recv() {
            Ok(ControllerEvent::Warning(msg)) => found.push(msg),
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    found
}

#[tokio::test]
async fn test_connect_runs_handshake() {
    let (session, _rx, device) = connected(fast_options()).await;

    assert_eq!(session.state(), LinkState::Idle);
    assert_eq!(device.received(), vec!["r", "admin", "imu", "munlock", "mpos"]);
    assert_eq!(session.status(), "Connected  |  M1:0  M2:0");
    assert!(session.tracker().snapshot().is_confirmed());
    assert!(device.snapshot().test_mode);
}

#[tokio::test]
async fn test_connect_without_imu_init() {
    let options = SessionOptions {
        init_imu: false,
        ..fast_options()
    };
    let (_session, _rx, device) = connected(options).await;
    assert_eq!(device.received(), vec!["r", "admin", "munlock", "mpos"]);
}

#[tokio::test]
async fn test_connect_without_position_report_is_flagged() {
    let (mut session, mut rx, device) = simulated(fast_options());
    let mut events = session.subscribe();
    device.set_silent(true);

    session.connect(None).unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(session.state(), LinkState::Idle);
    assert_eq!(session.status(), "Connected but no MPOS response!");
    assert!(!session.tracker().snapshot().is_confirmed());
    assert!(warnings(&mut events).iter().any(|w| w.contains("No [MPOS]")));
}

#[tokio::test]
async fn test_connect_twice_rejected() {
    let (mut session, _rx, _device) = connected(fast_options()).await;
    assert_eq!(session.connect(None), Err(SessionError::AlreadyConnected));
}

#[tokio::test]
async fn test_connect_needs_port() {
    let options = SessionOptions {
        params: ConnectionParams::default(),
        ..fast_options()
    };
    let (mut session, _rx, _device) = simulated(options);
    assert_eq!(session.connect(None), Err(SessionError::NoPort));
    assert_eq!(session.state(), LinkState::Disconnected);
}

struct RefusingConnector;

impl Connector for RefusingConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn LineTransport>, ConnectionError> {
        Err(ConnectionError::PortInUse {
            port: params.port.clone(),
        })
    }
}

#[tokio::test]
async fn test_connect_failure_surfaces_error() {
    let (mut session, mut rx) = session_with(fast_options(), Arc::new(RefusingConnector));
    session.connect(Some("COM4")).unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(session.state(), LinkState::Disconnected);
    assert_eq!(session.status(), "Error: Port already in use: COM4");
}

#[tokio::test]
async fn test_mirrored_axis_gets_negated_wire_steps() {
    let (mut session, mut rx, device) = connected(fast_options()).await;

    session.request_move(Axis::Two, Direction::Forward).unwrap();
    assert_eq!(session.status(), "Moving M2 +100 steps...");
    settle(&mut session, &mut rx).await;

    assert_eq!(device.received().last().map(String::as_str), Some("m2 -100"));
    assert_eq!(device.positions(), [0, -100]);
    assert_eq!(session.positions(), (0, 100));

    session.request_move(Axis::One, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;
    assert_eq!(device.received().last().map(String::as_str), Some("m1 100"));

    // A resync reads the mirrored report back in the user convention.
    session.query_positions().unwrap();
    settle(&mut session, &mut rx).await;
    assert_eq!(session.positions(), (100, 100));
    assert_eq!(session.status(), "Ready  |  M1:100  M2:100");
}

#[tokio::test]
async fn test_optimistic_moves_accumulate() {
    let (mut session, mut rx, device) = connected(fast_options()).await;

    session.set_step_amount(100).unwrap();
    session.request_move(Axis::One, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;
    session.set_step_amount(30).unwrap();
    session.request_move(Axis::One, Direction::Reverse).unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(session.positions(), (70, 0));
    // No position query after moves in optimistic mode.
    assert_eq!(device.received().iter().filter(|c| *c == "mpos").count(), 1);
}

struct ScriptedConnector(ScriptedTransport);

impl Connector for ScriptedConnector {
    fn open(&self, _params: &ConnectionParams) -> Result<Box<dyn LineTransport>, ConnectionError> {
        Ok(self.0.boxed())
    }
}

#[tokio::test]
async fn test_move_without_done_is_applied_but_unconfirmed() {
    // The controller echoes the move but `Done.` misses the wait window.
    let transport = ScriptedTransport::new()
        .reply("mpos", &["[MPOS] M1:0 M2:0"])
        .reply("m1 100", &["Moving motor 1 by 100 steps..."]);
    let (mut session, mut rx) = session_with(
        fast_options(),
        Arc::new(ScriptedConnector(transport.clone())),
    );
    session.connect(None).unwrap();
    settle(&mut session, &mut rx).await;
    assert!(session.tracker().snapshot().is_confirmed());
    let mut events = session.subscribe();

    session.request_move(Axis::One, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(transport.writes().last().map(String::as_str), Some("m1 100"));
    assert_eq!(session.positions(), (100, 0));
    assert!(!session.tracker().snapshot().is_confirmed());
    assert_eq!(session.state(), LinkState::Idle);
    assert!(warnings(&mut events)
        .iter()
        .any(|w| w.contains("M1 still moving")));
}

#[tokio::test]
async fn test_requery_mode_reads_positions_after_move() {
    let options = SessionOptions {
        tracking: TrackingMode::Requery,
        ..fast_options()
    };
    let (mut session, mut rx, device) = connected(options).await;

    session.request_move(Axis::One, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;

    let received = device.received();
    assert_eq!(&received[received.len() - 2..], &["m1 100", "mpos"]);
    assert_eq!(session.positions(), (100, 0));
}

#[tokio::test]
async fn test_disconnect_while_busy_leaves_tracker_untouched() {
    let (mut session, mut rx, device) = connected(fast_options()).await;

    session.request_move(Axis::One, Direction::Forward).unwrap();
    assert!(session.is_busy());

    let closing = session.disconnect().unwrap();
    assert!(!session.is_busy());
    assert_eq!(session.state(), LinkState::Disconnected);
    assert_eq!(session.status(), "Disconnected");
    closing.await.unwrap();

    while let Some(completion) = rx.try_recv() {
        session.apply(completion);
    }
    assert_eq!(session.positions(), (0, 0));
    assert_eq!(session.state(), LinkState::Disconnected);
    assert_eq!(device.received().last().map(String::as_str), Some("exit"));
    assert_eq!(device.snapshot().open_count, 0);
}

#[tokio::test]
async fn test_reconnect_right_after_disconnect() {
    let (mut session, mut rx, device) = connected(fast_options()).await;

    session.disconnect().unwrap();
    session.connect(None).unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(session.state(), LinkState::Idle);
    assert!(session.tracker().snapshot().is_confirmed());
    assert!(device.snapshot().test_mode);
}

#[tokio::test]
async fn test_reconnect_mid_handshake_keeps_old_sequence_off_new_link() {
    let options = SessionOptions {
        wait: WaitPolicy {
            imu_init: Duration::from_millis(200),
            ..WaitPolicy::immediate()
        },
        ..fast_options()
    };
    let (mut session, mut rx, device) = simulated(options);

    session.connect(None).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !device.received().iter().any(|c| c == "imu") {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("imu never sent");

    session.disconnect().unwrap();
    session.connect(None).unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(session.state(), LinkState::Idle);
    assert_eq!(
        device.received(),
        vec!["r", "admin", "imu", "exit", "r", "admin", "imu", "munlock", "mpos"]
    );
    assert_eq!(session.stats().cancelled, 1);
    assert!(session.tracker().snapshot().is_confirmed());
}

#[tokio::test]
async fn test_transport_error_forces_disconnect() {
    let (mut session, mut rx, device) = connected(fast_options()).await;
    device.set_fail_writes(true);

    session.request_move(Axis::One, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(session.status().starts_with("Error: Write failed for 'm1 100'"));
    assert_eq!(session.positions(), (0, 0));
}

#[tokio::test]
async fn test_limits_summary() {
    let (mut session, mut rx, _device) = connected(fast_options()).await;

    let step_to = |session: &mut MotorSession, axis: Axis, amount: i64, dir: Direction| {
        session.set_step_amount(amount).unwrap();
        session.request_move(axis, dir).unwrap();
    };

    step_to(&mut session, Axis::One, 50, Direction::Forward);
    settle(&mut session, &mut rx).await;
    assert_eq!(session.set_limit(Axis::One, LimitKind::In), 50);
    step_to(&mut session, Axis::One, 250, Direction::Forward);
    settle(&mut session, &mut rx).await;
    assert_eq!(session.set_limit(Axis::One, LimitKind::Out), 300);

    step_to(&mut session, Axis::Two, 10, Direction::Forward);
    settle(&mut session, &mut rx).await;
    session.set_limit(Axis::Two, LimitKind::In);
    step_to(&mut session, Axis::Two, 240, Direction::Forward);
    settle(&mut session, &mut rx).await;
    session.set_limit(Axis::Two, LimitKind::Out);

    let summary = session.summary();
    assert_eq!(summary.overall_min(), Some(10));
    assert_eq!(summary.overall_max(), Some(300));
    assert!(summary.to_string().ends_with(
        "#define MOTOR_MIN_POSITION 10\n#define MOTOR_MAX_POSITION 300"
    ));
}

#[tokio::test]
async fn test_reset_zeroes_and_resyncs() {
    let (mut session, mut rx, device) = connected(fast_options()).await;

    session.request_move(Axis::One, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;
    session.request_move(Axis::Two, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;
    assert_eq!(session.positions(), (100, 100));

    session.reset_positions(None).unwrap();
    settle(&mut session, &mut rx).await;
    let received = device.received();
    assert_eq!(&received[received.len() - 2..], &["mreset", "mpos"]);
    assert_eq!(session.positions(), (0, 0));
    assert_eq!(device.positions(), [0, 0]);
    assert!(session.tracker().snapshot().is_confirmed());
}

#[tokio::test]
async fn test_unacknowledged_reset_warns_and_resyncs() {
    let (mut session, mut rx, device) = connected(fast_options()).await;
    session.request_move(Axis::One, Direction::Forward).unwrap();
    settle(&mut session, &mut rx).await;
    session.request_move(Axis::Two, Direction::Reverse).unwrap();
    settle(&mut session, &mut rx).await;
    assert_eq!(session.positions(), (100, -100));
    let mut events = session.subscribe();

    // The firmware has no single-axis reset and answers `Unknown command`.
    session.reset_positions(Some(Axis::Two)).unwrap();
    let completion = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("bridge closed");
    session.apply(completion);

    assert_eq!(session.positions(), (100, -100));
    assert!(!session.tracker().snapshot().is_confirmed());
    assert!(session.is_busy());
    let found = warnings(&mut events);
    assert!(found.iter().any(|w| w.contains("Unknown command: 'mreset 2'")));
    assert!(found.iter().any(|w| w.contains("No [MRESET]")));

    settle(&mut session, &mut rx).await;
    let received = device.received();
    assert_eq!(&received[received.len() - 2..], &["mreset 2", "mpos"]);
    assert_eq!(session.positions(), (100, -100));
    assert!(session.tracker().snapshot().is_confirmed());
    assert_eq!(session.state(), LinkState::Idle);
}

#[tokio::test]
async fn test_rejected_command_warns_and_frees_session() {
    let (mut session, mut rx, _device) = connected(fast_options()).await;
    let mut events = session.subscribe();

    session.send_raw("bogus").unwrap();
    settle(&mut session, &mut rx).await;

    assert_eq!(session.state(), LinkState::Idle);
    assert!(warnings(&mut events)
        .iter()
        .any(|w| w.contains("Unknown command: 'bogus'")));
}

#[tokio::test]
async fn test_operations_gated_by_state() {
    let (mut session, mut rx, _device) = simulated(fast_options());
    assert_eq!(
        session.request_move(Axis::One, Direction::Forward),
        Err(SessionError::NotConnected)
    );

    session.connect(None).unwrap();
    assert_eq!(session.stop_motors(), Err(SessionError::Busy));
    settle(&mut session, &mut rx).await;

    session.request_move(Axis::One, Direction::Forward).unwrap();
    assert_eq!(
        session.request_move(Axis::One, Direction::Forward),
        Err(SessionError::Busy)
    );
    settle(&mut session, &mut rx).await;
    assert_eq!(session.positions(), (100, 0));
}

#[tokio::test]
async fn test_step_amount_and_speed_validation() {
    let (mut session, mut rx, device) = connected(fast_options()).await;

    assert_eq!(session.step_amount(), 100);
    assert!(matches!(
        session.set_step_amount(0),
        Err(SessionError::InvalidStepAmount { .. })
    ));
    assert!(session.set_step_amount(10_001).is_err());
    assert_eq!(session.step_amount(), 100);
    assert_eq!(session.set_step_amount(10_000), Ok(10_000));

    assert!(matches!(
        session.set_speed(16),
        Err(SessionError::InvalidSpeed { .. })
    ));
    session.set_speed(5).unwrap();
    settle(&mut session, &mut rx).await;
    assert_eq!(device.snapshot().speed_rpm, 5);

    session.stop_motors().unwrap();
    settle(&mut session, &mut rx).await;
    assert_eq!(device.received().last().map(String::as_str), Some("mstop"));
}

#[tokio::test]
async fn test_dispatcher_stats_follow_session() {
    let (session, _rx, _device) = connected(fast_options()).await;
    let stats = session.stats();
    assert_eq!(stats.commands_sent, 5);
    assert!(stats.lines_received > 0);
    assert_eq!(stats.transport_errors, 0);
}
