//! Command dispatcher ordering, cancellation and failure handling

mod common;

use common::ScriptedTransport;
use motorkit_communication::{Command, CommandDispatcher, MotorCommand, WaitPolicy};
use motorkit_core::{Axis, EventDispatcher, TransportError};
use std::time::{Duration, Instant};

fn raw(text: &str, wait_ms: u64) -> Command {
    Command::with_wait(
        MotorCommand::Raw(text.to_string()),
        Duration::from_millis(wait_ms),
    )
}

async fn attached(transport: &ScriptedTransport) -> CommandDispatcher {
    let dispatcher = CommandDispatcher::new(EventDispatcher::default());
    let epoch = dispatcher.epoch();
    assert!(dispatcher.attach(transport.boxed(), epoch).await.is_ok());
    dispatcher
}

#[tokio::test]
async fn test_commands_run_in_submission_order_without_overlap() {
    let transport = ScriptedTransport::new();
    let dispatcher = attached(&transport).await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.submit(&raw(&format!("cmd{}", i), 5)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(transport.writes(), vec!["cmd0", "cmd1", "cmd2", "cmd3", "cmd4"]);
    assert_eq!(transport.overlaps(), 0);
    assert_eq!(dispatcher.stats().commands_sent, 5);
}

#[tokio::test]
async fn test_response_holds_reply_lines() {
    let transport = ScriptedTransport::new().reply("mpos", &["[MPOS] M1:120 M2:-45"]);
    let dispatcher = attached(&transport).await;

    let command = Command::new(MotorCommand::QueryPositions, &WaitPolicy::immediate());
    let response = dispatcher.submit(&command).await.unwrap();
    assert_eq!(response.command, "mpos");
    assert_eq!(response.lines, vec!["[MPOS] M1:120 M2:-45"]);
}

#[tokio::test]
async fn test_stale_input_discarded_before_write() {
    let transport = ScriptedTransport::new().reply("mpos", &["[MPOS] M1:1 M2:2"]);
    let dispatcher = attached(&transport).await;
    transport.inject("[IMU] P:0.10 R:0.20");

    let response = dispatcher.submit(&raw("mpos", 0)).await.unwrap();
    assert_eq!(response.lines, vec!["[MPOS] M1:1 M2:2"]);
    assert_eq!(dispatcher.stats().stale_discarded, 1);
}

#[tokio::test]
async fn test_silent_device_yields_empty_response() {
    let transport = ScriptedTransport::new();
    let dispatcher = attached(&transport).await;

    let response = dispatcher.submit(&raw("mpos", 0)).await.unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_wait_window_is_honoured() {
    let transport = ScriptedTransport::new();
    let dispatcher = attached(&transport).await;
    let policy = WaitPolicy {
        base: Duration::from_millis(5),
        per_step: Duration::from_millis(1),
        ..WaitPolicy::immediate()
    };
    let command = Command::new(
        MotorCommand::Move {
            axis: Axis::One,
            steps: 30,
        },
        &policy,
    );
    assert_eq!(command.wait(), Duration::from_millis(30));

    let started = Instant::now();
    dispatcher.submit(&command).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_write_failure_surfaces_transport_error() {
    let transport = ScriptedTransport::new();
    let dispatcher = attached(&transport).await;
    transport.fail_writes();

    let err = dispatcher.submit(&raw("m1 100", 0)).await.unwrap_err();
    assert_eq!(
        err,
        TransportError::WriteFailed {
            command: "m1 100".to_string(),
            reason: "pipe gone".to_string()
        }
    );
    assert_eq!(dispatcher.stats().transport_errors, 1);
}

#[tokio::test]
async fn test_read_failure_surfaces_transport_error() {
    let transport = ScriptedTransport::new();
    let dispatcher = attached(&transport).await;
    transport.fail_reads();

    let err = dispatcher.submit(&raw("mpos", 0)).await.unwrap_err();
    assert!(matches!(err, TransportError::ReadFailed { .. }));
}

#[tokio::test]
async fn test_submit_without_link() {
    let dispatcher = CommandDispatcher::new(EventDispatcher::default());
    assert_eq!(
        dispatcher.submit(&raw("mpos", 0)).await.unwrap_err(),
        TransportError::NotConnected
    );
}

#[tokio::test]
async fn test_detach_cancels_queued_and_lets_in_flight_finish() {
    let transport = ScriptedTransport::new();
    let dispatcher = attached(&transport).await;

    let first = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.submit(&raw("m1 100", 30)).await })
    };
    let second = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.submit(&raw("m2 100", 0)).await })
    };
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let closed = dispatcher
        .detach(Some(("exit".to_string(), Duration::ZERO)))
        .await;
    assert!(closed);

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(transport.writes(), vec!["m1 100", "exit"]);
    assert!(transport.is_closed());
    assert_eq!(dispatcher.stats().cancelled, 1);
}

#[tokio::test]
async fn test_attach_refused_after_detach() {
    let dispatcher = CommandDispatcher::new(EventDispatcher::default());
    let epoch = dispatcher.epoch();
    assert!(!dispatcher.detach(None).await);

    let transport = ScriptedTransport::new();
    assert!(dispatcher.attach(transport.boxed(), epoch).await.is_err());
}

#[tokio::test]
async fn test_detach_leaves_later_link_alone() {
    let dispatcher = CommandDispatcher::new(EventDispatcher::default());
    let old = ScriptedTransport::new();
    assert!(dispatcher.attach(old.boxed(), dispatcher.epoch()).await.is_ok());

    let pending_detach = dispatcher.detach(None);
    let new = ScriptedTransport::new().reply("mpos", &["[MPOS] M1:0 M2:0"]);
    assert!(dispatcher.attach(new.boxed(), dispatcher.epoch()).await.is_ok());
    assert!(old.is_closed());

    assert!(!pending_detach.await);
    assert!(!new.is_closed());
    let response = dispatcher.submit(&raw("mpos", 0)).await.unwrap();
    assert_eq!(response.lines.len(), 1);
}

#[tokio::test]
async fn test_command_bound_to_old_link_never_reaches_new_one() {
    let old = ScriptedTransport::new();
    let dispatcher = attached(&old).await;
    let old_epoch = dispatcher.epoch();

    dispatcher.detach(None).await;
    let new = ScriptedTransport::new();
    assert!(dispatcher.attach(new.boxed(), dispatcher.epoch()).await.is_ok());

    let result = dispatcher.submit_at(old_epoch, &raw("munlock", 0)).await;
    assert!(matches!(result, Err(TransportError::Cancelled { .. })));
    assert!(new.writes().is_empty());
    assert_eq!(dispatcher.stats().cancelled, 1);

    assert!(dispatcher.submit(&raw("mpos", 0)).await.is_ok());
    assert_eq!(new.writes(), vec!["mpos"]);
}
