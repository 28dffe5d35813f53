//! Motor session
//!
//! Owns the connection state machine and the operator-facing operations.
//!
//! `Disconnected → Connecting → Idle ⇄ Busy → Disconnected`
//!
//! Every operation runs its I/O on a short-lived task spawned onto the
//! runtime and returns immediately. Results come back as [`Completion`]s on
//! the bridge and take effect only when the presentation context calls
//! [`MotorSession::apply`]. That call is the single place tracked positions
//! change in response to the device.

use super::bridge::{self, Completion, CompletionKind, CompletionReceiver, CompletionSender};
use super::tracker::{tracker_handle, LimitsSummary, TrackerHandle, TrackerView};
use crate::communication::dispatcher::{CommandDispatcher, DispatchStats, Response};
use crate::communication::link::{close_gracefully, drain_boot, Connector};
use crate::communication::ConnectionParams;
use crate::firmware::{
    Command, Continuation, MotorCommand, ParsedResponse, ResponseParser, WaitPolicy,
    MAX_SPEED_RPM, MIN_SPEED_RPM,
};
use motorkit_core::{
    Axis, AxisOrientation, ConnectionError, ControllerEvent, Direction, EventDispatcher,
    LimitKind, LinkState, LogLine, SessionError, TrackingMode, TransportError,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Port and framing; `port` is the default when `connect` gets none
    pub params: ConnectionParams,
    /// Reply windows
    pub wait: WaitPolicy,
    /// Axis orientation
    pub orientation: AxisOrientation,
    /// Move tracking strategy
    pub tracking: TrackingMode,
    /// Send `imu` during the connect sequence
    pub init_imu: bool,
    /// Send `munlock` during the connect sequence
    pub unlock_limits: bool,
    /// Step amount presets offered to the operator
    pub step_presets: Vec<i64>,
    /// Initial step amount
    pub default_step: i64,
    /// Smallest custom step amount
    pub min_step: i64,
    /// Largest custom step amount
    pub max_step: i64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            params: ConnectionParams::default(),
            wait: WaitPolicy::default(),
            orientation: AxisOrientation::mirrored(Axis::Two),
            tracking: TrackingMode::Optimistic,
            init_imu: true,
            unlock_limits: true,
            step_presets: vec![10, 50, 100, 500, 1000],
            default_step: 100,
            min_step: 1,
            max_step: 10_000,
        }
    }
}

/// Session with one motor controller
pub struct MotorSession {
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    dispatcher: CommandDispatcher,
    events: EventDispatcher,
    completions: CompletionSender,
    tracker: TrackerHandle,
    state: LinkState,
    generation: u64,
    port: Option<String>,
    step_amount: i64,
    status: String,
}

impl MotorSession {
    /// Create a disconnected session
    ///
    /// Returns the session and the receiving end of its result bridge; feed
    /// every completion from the receiver back into [`apply`](Self::apply).
    pub fn new(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        runtime: Handle,
    ) -> (Self, CompletionReceiver) {
        let events = EventDispatcher::default();
        let (completions, receiver) = bridge::channel();
        let step_amount = options.default_step;
        let session = Self {
            options,
            connector,
            runtime,
            dispatcher: CommandDispatcher::new(events.clone()),
            events,
            completions,
            tracker: tracker_handle(),
            state: LinkState::Disconnected,
            generation: 0,
            port: None,
            step_amount,
            status: "Disconnected".to_string(),
        };
        (session, receiver)
    }

    // ----- queries -----

    /// Connection state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// True while a command is in flight
    pub fn is_busy(&self) -> bool {
        self.state == LinkState::Busy
    }

    /// Status line for the presentation layer
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Port of the current connection
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Session configuration
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Read-only view of tracked positions and limits
    pub fn tracker(&self) -> TrackerView {
        TrackerView::new(self.tracker.clone())
    }

    /// Positions of both axes
    pub fn positions(&self) -> (i64, i64) {
        self.tracker.read().positions()
    }

    /// Limits summary
    pub fn summary(&self) -> LimitsSummary {
        self.tracker.read().summary()
    }

    /// Current step amount
    pub fn step_amount(&self) -> i64 {
        self.step_amount
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Event dispatcher shared with the link
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Dispatcher statistics
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    // ----- operations -----

    /// Open `port` (or the configured port) and run the connect sequence
    ///
    /// Returns immediately. The link reaches Idle once the final position
    /// query's completion is applied.
    pub fn connect(&mut self, port: Option<&str>) -> Result<(), SessionError> {
        if self.state != LinkState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }
        let port = port
            .map(str::to_string)
            .unwrap_or_else(|| self.options.params.port.clone());
        if port.trim().is_empty() {
            return Err(SessionError::NoPort);
        }

        self.generation += 1;
        self.port = Some(port.clone());
        self.tracker.write().begin_session();
        self.set_state(LinkState::Connecting);
        self.status = "Connecting...".to_string();
        tracing::info!("Connecting to {}", port);

        let mut params = self.options.params.clone();
        params.port = port;
        let sequence = self.connect_sequence();
        let generation = self.generation;
        let epoch = self.dispatcher.epoch();
        let connector = self.connector.clone();
        let dispatcher = self.dispatcher.clone();
        let events = self.events.clone();
        let completions = self.completions.clone();

        self.runtime.spawn(async move {
            let port = params.port.clone();
            let settle = params.boot_settle;
            let opened = tokio::task::spawn_blocking(move || connector.open(&params))
                .await
                .unwrap_or_else(|e| {
                    Err(ConnectionError::FailedToOpen {
                        port: port.clone(),
                        reason: e.to_string(),
                    })
                });

            let mut transport = match opened {
                Ok(transport) => transport,
                Err(e) => {
                    completions.send(generation, CompletionKind::ConnectFailed(e));
                    return;
                }
            };

            events.log(LogLine::Note(format!("Opened {}, waiting for boot...", port)));
            drain_boot(transport.as_mut(), settle, &events).await;

            if let Err(transport) = dispatcher.attach(transport, epoch).await {
                close_gracefully(transport, None, &events).await;
                return;
            }
            completions.send(generation, CompletionKind::Opened { port });

            for command in sequence {
                let outcome = dispatcher.submit_at(epoch, &command).await;
                let failed = outcome.is_err();
                completions.send(generation, CompletionKind::Command { command, outcome });
                if failed {
                    break;
                }
            }
        });
        Ok(())
    }

    fn connect_sequence(&self) -> Vec<Command> {
        let wait = &self.options.wait;
        let mut sequence = vec![
            Command::new(MotorCommand::EnterIdle, wait),
            Command::new(MotorCommand::EnterTestMode, wait),
        ];
        if self.options.init_imu {
            sequence.push(Command::new(MotorCommand::InitImu, wait));
        }
        if self.options.unlock_limits {
            sequence.push(Command::new(MotorCommand::UnlockLimits, wait));
        }
        sequence.push(
            Command::new(MotorCommand::QueryPositions, wait).then(Continuation::VerifyConnect),
        );
        sequence
    }

    /// Close the link
    ///
    /// Clears busy immediately and leaves tracked positions as they are.
    /// Completions still in flight are ignored once they arrive. The returned
    /// task finishes after the in-flight command's wait window, the `exit`
    /// farewell and the port release.
    pub fn disconnect(&mut self) -> Option<JoinHandle<()>> {
        if self.state == LinkState::Disconnected {
            return None;
        }
        self.generation += 1;
        self.set_state(LinkState::Disconnected);
        self.status = "Disconnected".to_string();
        self.events.log(LogLine::Note("Disconnected".to_string()));
        tracing::info!("Disconnecting from {}", self.port.as_deref().unwrap_or("?"));

        let farewell = (MotorCommand::ExitTestMode.wire_text(), self.options.wait.base);
        let detach = self.dispatcher.detach(Some(farewell));
        let completions = self.completions.clone();
        let generation = self.generation;
        Some(self.runtime.spawn(async move {
            detach.await;
            completions.send(generation, CompletionKind::Closed);
        }))
    }

    /// Move one axis by the current step amount in `direction`
    pub fn request_move(&mut self, axis: Axis, direction: Direction) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let steps = direction.apply(self.step_amount);
        let wire_steps = self.options.orientation.to_wire(axis, steps);
        let command = Command::new(
            MotorCommand::Move {
                axis,
                steps: wire_steps,
            },
            &self.options.wait,
        )
        .then(Continuation::ApplyMove { axis, steps });
        self.status = format!("Moving M{} {:+} steps...", axis.number(), steps);
        self.dispatch(command);
        Ok(())
    }

    /// Record the current position of `axis` as its IN or OUT limit
    pub fn set_limit(&mut self, axis: Axis, which: LimitKind) -> i64 {
        let value = self.tracker.write().set_limit(axis, which);
        tracing::info!("{} {} limit set to {}", axis, which, value);
        self.events.log(LogLine::Note(format!("{} {} = {}", axis, which, value)));
        value
    }

    /// Zero the position counters on the device, then resync
    pub fn reset_positions(&mut self, axis: Option<Axis>) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let command = Command::new(MotorCommand::ResetPositions { axis }, &self.options.wait)
            .then(Continuation::ConfirmReset { axis });
        self.dispatch(command);
        Ok(())
    }

    /// Query the device for positions and replace the tracked values
    pub fn query_positions(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.dispatch(
            Command::new(MotorCommand::QueryPositions, &self.options.wait)
                .then(Continuation::Resync),
        );
        Ok(())
    }

    /// Stop and release all motors
    pub fn stop_motors(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.dispatch(Command::new(MotorCommand::StopMotors, &self.options.wait));
        Ok(())
    }

    /// Set the motor speed
    pub fn set_speed(&mut self, rpm: u32) -> Result<(), SessionError> {
        if !(MIN_SPEED_RPM..=MAX_SPEED_RPM).contains(&rpm) {
            return Err(SessionError::InvalidSpeed {
                rpm,
                min: MIN_SPEED_RPM,
                max: MAX_SPEED_RPM,
            });
        }
        self.ensure_idle()?;
        self.dispatch(Command::new(MotorCommand::SetSpeed { rpm }, &self.options.wait));
        Ok(())
    }

    /// Send a line verbatim. Blank input sends nothing.
    pub fn send_raw(&mut self, text: &str) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.dispatch(Command::new(
            MotorCommand::Raw(text.to_string()),
            &self.options.wait,
        ));
        Ok(())
    }

    /// Choose the step amount used by moves
    ///
    /// Values outside the configured range are rejected and the current
    /// amount is kept.
    pub fn set_step_amount(&mut self, amount: i64) -> Result<i64, SessionError> {
        let (min, max) = (self.options.min_step, self.options.max_step);
        if !(min..=max).contains(&amount) {
            return Err(SessionError::InvalidStepAmount {
                value: amount,
                min,
                max,
            });
        }
        self.step_amount = amount;
        Ok(amount)
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.state {
            LinkState::Idle => Ok(()),
            LinkState::Disconnected => Err(SessionError::NotConnected),
            LinkState::Connecting | LinkState::Busy => Err(SessionError::Busy),
        }
    }

    fn dispatch(&mut self, command: Command) {
        self.set_state(LinkState::Busy);
        let submit = self.dispatcher.submit(&command);
        let completions = self.completions.clone();
        let generation = self.generation;
        self.runtime.spawn(async move {
            let outcome = submit.await;
            completions.send(generation, CompletionKind::Command { command, outcome });
        });
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            tracing::debug!("Link state {} -> {}", self.state, state);
            self.state = state;
            let _ = self.events.publish(ControllerEvent::StateChanged(state));
        }
    }

    // ----- completion path -----

    /// Apply a completion from the result bridge
    ///
    /// Completions from an earlier connection are ignored.
    pub fn apply(&mut self, completion: Completion) {
        if completion.generation != self.generation {
            tracing::debug!(
                "Ignoring completion from connection {} (current {})",
                completion.generation,
                self.generation
            );
            return;
        }

        match completion.kind {
            CompletionKind::Opened { port } => {
                tracing::info!("Link to {} open, running connect sequence", port);
            }
            CompletionKind::ConnectFailed(e) => {
                tracing::error!("Connection failed: {}", e);
                self.events.log(LogLine::Error(format!("Connection failed: {}", e)));
                let _ = self.events.publish(ControllerEvent::Error(e.to_string()));
                self.port = None;
                self.set_state(LinkState::Disconnected);
                self.status = format!("Error: {}", e);
            }
            CompletionKind::Command { command, outcome } => match outcome {
                Ok(response) => self.apply_response(&command, &response),
                Err(e) => self.apply_transport_error(&command, e),
            },
            CompletionKind::Closed => {
                tracing::debug!("Link released");
            }
        }
    }

    fn apply_transport_error(&mut self, command: &Command, error: TransportError) {
        if error.is_cancelled() {
            tracing::debug!("'{}' cancelled", command.text());
            return;
        }
        tracing::error!("'{}' failed: {}", command.text(), error);
        let _ = self.events.publish(ControllerEvent::Error(error.to_string()));
        self.status = format!("Error: {}", error);

        // The link is unusable: release the handle without a farewell.
        self.generation += 1;
        self.set_state(LinkState::Disconnected);
        self.runtime.spawn(self.dispatcher.detach(None));
    }

    fn apply_response(&mut self, command: &Command, response: &Response) {
        let parsed = ResponseParser::parse_all(&response.lines);
        for error in &parsed.errors {
            tracing::warn!("{}", error);
        }

        match command.continuation() {
            Continuation::None => {
                if self.state == LinkState::Busy {
                    self.warn_if_rejected(&parsed);
                    self.finish_command();
                }
            }
            Continuation::VerifyConnect => self.verify_connect(&parsed),
            Continuation::ApplyMove { axis, steps } => {
                if self.warn_if_rejected(&parsed) {
                    self.finish_command();
                    return;
                }
                if parsed.move_unfinished() {
                    self.warn(&format!(
                        "{} still moving when its wait window closed",
                        axis
                    ));
                    self.tracker.write().mark_unconfirmed();
                }
                match self.options.tracking {
                    TrackingMode::Optimistic => {
                        self.tracker.write().apply_optimistic_move(axis, steps);
                        self.publish_positions();
                        self.finish_command();
                    }
                    TrackingMode::Requery => self.resync(),
                }
            }
            Continuation::ConfirmReset { axis } => {
                if parsed.reset_acknowledged() {
                    self.tracker.write().reset_positions(axis);
                    self.publish_positions();
                } else {
                    self.warn_if_rejected(&parsed);
                    self.warn("No [MRESET] acknowledgement in response");
                    self.tracker.write().mark_unconfirmed();
                }
                self.resync();
            }
            Continuation::Resync => {
                self.apply_position_report(&parsed);
                self.finish_command();
            }
        }
    }

    fn verify_connect(&mut self, parsed: &ParsedResponse) {
        self.set_state(LinkState::Idle);
        if self.apply_position_report(parsed) {
            let (m1, m2) = self.positions();
            self.status = format!("Connected  |  M1:{}  M2:{}", m1, m2);
            tracing::info!("Connection verified - test mode active");
            self.events.log(LogLine::Note(
                "Connection verified - test mode active".to_string(),
            ));
        } else {
            self.status = "Connected but no MPOS response!".to_string();
        }
    }

    /// Apply the last position report, converting to the user convention.
    /// Without one the tracker is flagged unconfirmed.
    fn apply_position_report(&mut self, parsed: &ParsedResponse) -> bool {
        match parsed.positions() {
            Some((m1, m2)) => {
                let orientation = self.options.orientation;
                self.tracker.write().apply_positions(
                    orientation.from_wire(Axis::One, m1),
                    orientation.from_wire(Axis::Two, m2),
                );
                self.publish_positions();
                true
            }
            None => {
                self.tracker.write().mark_unconfirmed();
                self.warn("No [MPOS] in response - may not be in test mode");
                false
            }
        }
    }

    fn resync(&mut self) {
        let command =
            Command::new(MotorCommand::QueryPositions, &self.options.wait).then(Continuation::Resync);
        self.dispatch(command);
    }

    fn finish_command(&mut self) {
        self.set_state(LinkState::Idle);
        let (m1, m2) = self.positions();
        self.status = format!("Ready  |  M1:{}  M2:{}", m1, m2);
    }

    fn warn_if_rejected(&mut self, parsed: &ParsedResponse) -> bool {
        match parsed.rejection() {
            Some(message) => {
                let message = format!("Device rejected command: {}", message);
                self.warn(&message);
                true
            }
            None => false,
        }
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
        self.events.log(LogLine::Note(format!("WARNING: {}", message)));
        let _ = self
            .events
            .publish(ControllerEvent::Warning(message.to_string()));
    }

    fn publish_positions(&self) {
        let (m1, m2) = self.positions();
        let _ = self
            .events
            .publish(ControllerEvent::PositionsChanged { m1, m2 });
    }
}

impl std::fmt::Debug for MotorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorSession")
            .field("state", &self.state)
            .field("port", &self.port)
            .field("generation", &self.generation)
            .field("status", &self.status)
            .finish()
    }
}
