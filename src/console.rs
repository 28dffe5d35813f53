//! Line-oriented operator console
//!
//! Reads commands from stdin and drives a [`MotorSession`]. The console task
//! is the presentation context: it is the only place completions from the
//! result bridge are applied, and it prints the serial log and status line
//! as they change.

use motorkit_communication::{
    list_ports, CompletionReceiver, MotorSession, SerialPortInfo,
};
use motorkit_core::{Axis, ControllerEvent, Direction, LimitKind};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Port name used with the simulated device
pub const SIMULATED_PORT: &str = "SIM";

const HELP: &str = "\
Commands:
  connect [port]       open the link and run the connect sequence
  disconnect           close the link
  ports                list serial ports
  step [n]             show or set the step amount
  move <1|2> <+|->     move a motor by the step amount (alias: jog)
  in <1|2>             record the current position as the IN limit
  out <1|2>            record the current position as the OUT limit
  reset [1|2]          zero position counters
  pos                  query positions
  stop                 stop all motors
  speed <rpm>          set motor speed (1-15)
  send <text>          send a raw command
  summary              show recorded limits
  status               show the status line
  help                 this text
  quit                 disconnect and leave";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect(Option<String>),
    Disconnect,
    Ports,
    Step(Option<i64>),
    Move(Axis, Direction),
    Limit(Axis, LimitKind),
    Reset(Option<Axis>),
    Query,
    Stop,
    Speed(u32),
    Send(String),
    Summary,
    Status,
    Help,
    Quit,
}

/// A console line that could not be understood
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseCommandError {}

fn usage(text: &str) -> ParseCommandError {
    ParseCommandError(format!("usage: {}", text))
}

fn parse_axis(arg: Option<&str>, form: &str) -> Result<Axis, ParseCommandError> {
    arg.and_then(|a| a.trim_start_matches(['m', 'M']).parse::<u8>().ok())
        .and_then(Axis::from_number)
        .ok_or_else(|| usage(form))
}

fn parse_direction(arg: Option<&str>) -> Result<Direction, ParseCommandError> {
    match arg {
        Some("+") | Some("fwd") | Some("forward") => Ok(Direction::Forward),
        Some("-") | Some("rev") | Some("reverse") => Ok(Direction::Reverse),
        _ => Err(usage("move <1|2> <+|->")),
    }
}

impl FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));
        let mut args = rest.split_whitespace();

        let command = match word.to_ascii_lowercase().as_str() {
            "connect" | "c" => ConsoleCommand::Connect(args.next().map(str::to_string)),
            "disconnect" | "d" => ConsoleCommand::Disconnect,
            "ports" => ConsoleCommand::Ports,
            "step" => match args.next() {
                None => ConsoleCommand::Step(None),
                Some(n) => ConsoleCommand::Step(Some(
                    n.parse().map_err(|_| usage("step [n]"))?,
                )),
            },
            "move" | "jog" | "m" => {
                let axis = parse_axis(args.next(), "move <1|2> <+|->")?;
                ConsoleCommand::Move(axis, parse_direction(args.next())?)
            }
            "in" => ConsoleCommand::Limit(parse_axis(args.next(), "in <1|2>")?, LimitKind::In),
            "out" => ConsoleCommand::Limit(parse_axis(args.next(), "out <1|2>")?, LimitKind::Out),
            "reset" => match args.next() {
                None => ConsoleCommand::Reset(None),
                arg => ConsoleCommand::Reset(Some(parse_axis(arg, "reset [1|2]")?)),
            },
            "pos" | "mpos" => ConsoleCommand::Query,
            "stop" => ConsoleCommand::Stop,
            "speed" => ConsoleCommand::Speed(
                args.next()
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| usage("speed <rpm>"))?,
            ),
            "send" | "raw" => {
                if rest.is_empty() {
                    return Err(usage("send <text>"));
                }
                ConsoleCommand::Send(rest.to_string())
            }
            "summary" | "limits" => ConsoleCommand::Summary,
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "q" => ConsoleCommand::Quit,
            other => {
                return Err(ParseCommandError(format!(
                    "unknown command '{}', type 'help'",
                    other
                )))
            }
        };

        if !matches!(command, ConsoleCommand::Send(_)) && args.next().is_some() {
            return Err(ParseCommandError(format!("too many arguments for '{}'", word)));
        }
        Ok(command)
    }
}

/// Operator console bound to one session
pub struct Console {
    session: MotorSession,
    completions: CompletionReceiver,
    simulate: bool,
    last_status: String,
}

impl Console {
    /// Wrap a session and the receiving end of its result bridge
    pub fn new(session: MotorSession, completions: CompletionReceiver, simulate: bool) -> Self {
        let last_status = session.status().to_string();
        Self {
            session,
            completions,
            simulate,
            last_status,
        }
    }

    /// The session being driven
    pub fn session(&self) -> &MotorSession {
        &self.session
    }

    /// Port to open when `connect` names none
    ///
    /// The configured port when present in the system list, else the first
    /// listed port, else the configured port as is.
    fn resolve_port(&self, requested: Option<String>) -> Option<String> {
        if requested.is_some() {
            return requested;
        }
        if self.simulate {
            return Some(SIMULATED_PORT.to_string());
        }
        let configured = self.session.options().params.port.clone();
        let first = list_ports(&configured)
            .ok()
            .and_then(|ports| ports.into_iter().next());
        Some(first.map_or(configured, |port| port.port_name))
    }

    /// Run one command; returns the text to show and whether to keep going
    pub fn execute(&mut self, command: ConsoleCommand) -> (Option<String>, bool) {
        let outcome = match command {
            ConsoleCommand::Connect(port) => {
                let port = self.resolve_port(port);
                self.session.connect(port.as_deref()).map(|_| None)
            }
            ConsoleCommand::Disconnect => {
                self.session.disconnect();
                Ok(None)
            }
            ConsoleCommand::Ports => Ok(Some(if self.simulate {
                format!("{} (simulated device)", SIMULATED_PORT)
            } else {
                let configured = &self.session.options().params.port;
                format_ports(&list_ports(configured).unwrap_or_default())
            })),
            ConsoleCommand::Step(None) => Ok(Some(format!(
                "Step amount: {}  (presets: {})",
                self.session.step_amount(),
                self.session
                    .options()
                    .step_presets
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
            ConsoleCommand::Step(Some(n)) => self
                .session
                .set_step_amount(n)
                .map(|n| Some(format!("Step amount: {}", n))),
            ConsoleCommand::Move(axis, direction) => {
                self.session.request_move(axis, direction).map(|_| None)
            }
            ConsoleCommand::Limit(axis, which) => {
                self.session.set_limit(axis, which);
                Ok(None)
            }
            ConsoleCommand::Reset(axis) => self.session.reset_positions(axis).map(|_| None),
            ConsoleCommand::Query => self.session.query_positions().map(|_| None),
            ConsoleCommand::Stop => self.session.stop_motors().map(|_| None),
            ConsoleCommand::Speed(rpm) => self.session.set_speed(rpm).map(|_| None),
            ConsoleCommand::Send(text) => self.session.send_raw(&text).map(|_| None),
            ConsoleCommand::Summary => Ok(Some(self.session.summary().to_string())),
            ConsoleCommand::Status => Ok(Some(self.session.status().to_string())),
            ConsoleCommand::Help => Ok(Some(HELP.to_string())),
            ConsoleCommand::Quit => return (None, false),
        };

        match outcome {
            Ok(text) => (text, true),
            Err(e) => (Some(format!("Error: {}", e)), true),
        }
    }

    fn status_changed(&mut self) -> Option<String> {
        let status = self.session.status();
        if status != self.last_status {
            self.last_status = status.to_string();
            Some(format!("[{}]", status))
        } else {
            None
        }
    }

    /// Drive the session from stdin until `quit` or end of input
    pub async fn run<W: AsyncWrite + Unpin>(mut self, mut out: W) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut events = self.session.subscribe();

        out.write_all(format!("motorkit {}, type 'help'\n", crate::VERSION).as_bytes())
            .await?;
        out.flush().await?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        tracing::debug!("Console input closed");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let (text, keep_going) = match line.parse::<ConsoleCommand>() {
                        Ok(command) => self.execute(command),
                        Err(e) => (Some(e.to_string()), true),
                    };
                    if let Some(text) = text {
                        out.write_all(format!("{}\n", text).as_bytes()).await?;
                    }
                    if !keep_going {
                        break;
                    }
                }
                Some(completion) = self.completions.recv() => {
                    self.session.apply(completion);
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(text) = render_event(&event) {
                            out.write_all(format!("{}\n", text).as_bytes()).await?;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Console skipped {} log events", n);
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            if let Some(status) = self.status_changed() {
                out.write_all(format!("{}\n", status).as_bytes()).await?;
            }
            out.flush().await?;
        }

        if let Some(closing) = self.session.disconnect() {
            let _ = closing.await;
        }
        out.flush().await?;
        Ok(())
    }
}

/// Console text for an event, if it is shown at all
pub fn render_event(event: &ControllerEvent) -> Option<String> {
    match event {
        ControllerEvent::Log(line) => Some(format!("  {}", line)),
        ControllerEvent::Warning(_) | ControllerEvent::Error(_) => Some(event.to_string()),
        ControllerEvent::StateChanged(_) | ControllerEvent::PositionsChanged { .. } => None,
    }
}

fn format_ports(ports: &[SerialPortInfo]) -> String {
    if ports.is_empty() {
        return "No serial ports found".to_string();
    }
    ports
        .iter()
        .map(|p| format!("{}  {}", p.port_name, p.description))
        .collect::<Vec<_>>()
        .join("\n")
}
