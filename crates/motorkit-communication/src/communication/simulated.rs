//! Simulated controller
//!
//! An in-process stand-in for the leveling controller firmware: it prints the
//! boot banner when opened and answers the admin test-mode command set with
//! the same text the hardware does. Used by `--simulate` and by tests.
//!
//! `munlock` and `mlock` are extras the current firmware does not have; they
//! toggle the soft position clamp. Everything the firmware rejects, such as
//! `mreset <n>`, gets its `Unknown command` reply.

use super::LineTransport;
use motorkit_core::{thread_safe, ThreadSafe};
use std::collections::VecDeque;
use std::io;

const DEFAULT_MIN_POSITION: i64 = -2048;
const DEFAULT_MAX_POSITION: i64 = 2048;
const DEFAULT_SPEED_RPM: u32 = 10;

const BOOT_BANNER: &[&str] = &[
    "===========================================",
    "  Self-Leveling Platform Firmware v1.0",
    "===========================================",
    "System ready. Press button to start leveling.",
    "Type 'h' for serial command help.",
];

const TEST_MODE_MENU: &[&str] = &[
    "===========================================",
    "       ADMIN TEST MODE",
    "===========================================",
    "Commands:",
    "  Motors:  m1/m2 <steps>, m1c, m2c, mstop, mspeed <rpm>",
    "           mpos (query positions), mreset (reset to zero)",
    "  IMU:     scan, imu, read, stream, cal, raw",
    "  Exit:    exit (return to normal mode)",
    "===========================================",
];

/// Observable state of the simulated controller
#[derive(Debug, Clone)]
pub struct SimulatedState {
    /// Admin test mode active
    pub test_mode: bool,
    /// Motor positions in firmware convention
    pub positions: [i64; 2],
    /// Firmware minimum position
    pub min_position: i64,
    /// Firmware maximum position
    pub max_position: i64,
    /// Position limits enforced
    pub limits_enforced: bool,
    /// Motor speed in RPM
    pub speed_rpm: u32,
    /// IMU initialised
    pub imu_ready: bool,
    /// Every line written to the device, in order
    pub received: Vec<String>,
    /// Print the boot banner on open
    pub banner: bool,
    /// Swallow commands without replying
    pub silent: bool,
    /// Fail every write with a broken pipe
    pub fail_writes: bool,
    /// Open transports
    pub open_count: usize,
    outbox: VecDeque<String>,
}

impl Default for SimulatedState {
    fn default() -> Self {
        Self {
            test_mode: false,
            positions: [0, 0],
            min_position: DEFAULT_MIN_POSITION,
            max_position: DEFAULT_MAX_POSITION,
            limits_enforced: true,
            speed_rpm: DEFAULT_SPEED_RPM,
            imu_ready: false,
            received: Vec::new(),
            banner: true,
            silent: false,
            fail_writes: false,
            open_count: 0,
            outbox: VecDeque::new(),
        }
    }
}

impl SimulatedState {
    fn say(&mut self, line: impl Into<String>) {
        self.outbox.push_back(line.into());
    }

    fn boot(&mut self) {
        self.test_mode = false;
        self.outbox.clear();
        if self.banner {
            for line in BOOT_BANNER {
                self.say(*line);
            }
        }
    }

    fn move_motor(&mut self, index: usize, steps: i64) {
        let target = self.positions[index].saturating_add(steps);
        self.positions[index] = if self.limits_enforced {
            target.clamp(self.min_position, self.max_position)
        } else {
            target
        };
    }

    fn handle(&mut self, input: &str) {
        self.received.push(input.to_string());
        if self.silent {
            return;
        }

        let input = input.trim();
        if input.is_empty() {
            return;
        }

        if input.eq_ignore_ascii_case("admin") || input.eq_ignore_ascii_case("test") {
            self.test_mode = true;
            self.speed_rpm = DEFAULT_SPEED_RPM;
            for line in TEST_MODE_MENU {
                self.say(*line);
            }
            return;
        }

        if self.test_mode {
            self.handle_test_mode(input);
        } else {
            self.handle_normal_mode(input);
        }
    }

    fn handle_normal_mode(&mut self, input: &str) {
        let mut chars = input.chars();
        let cmd = chars.next().unwrap_or(' ');
        match cmd.to_ascii_lowercase() {
            'r' => self.say("Resetting to IDLE state..."),
            'h' | '?' => self.say("Commands: h s i c r l m1/m2 <steps> test"),
            'm' => {
                let motor = chars.next();
                let steps = parse_leading_int(chars.as_str());
                match motor {
                    Some(c @ ('1' | '2')) if input.len() >= 3 => {
                        self.say(format!("Moving motor {} by {} steps...", c, steps));
                        self.move_motor(if c == '1' { 0 } else { 1 }, steps);
                        self.say("Done.");
                    }
                    _ if input.len() < 3 => self.say("Usage: m1 <steps> or m2 <steps>"),
                    _ => self.say("Invalid motor number. Use m1 or m2."),
                }
            }
            _ => self.say(format!("Unknown command: '{}'. Type 'h' for help.", cmd)),
        }
    }

    fn handle_test_mode(&mut self, input: &str) {
        let lower = input.to_ascii_lowercase();

        if lower == "exit" {
            self.say("Exiting test mode...");
            self.test_mode = false;
            return;
        }

        if lower == "help" || lower == "menu" || lower == "?" {
            for line in TEST_MODE_MENU {
                self.say(*line);
            }
            return;
        }

        if lower == "imu" {
            self.say("Initializing IMU...");
            self.imu_ready = true;
            self.say("IMU initialized successfully!");
            return;
        }

        for (prefix, index) in [("m1 ", 0usize), ("m2 ", 1usize)] {
            if lower.starts_with(prefix) && input.len() > 3 {
                let steps = parse_leading_int(&input[3..]);
                self.say(format!("Moving motor {} by {} steps...", index + 1, steps));
                self.move_motor(index, steps);
                self.say("Done.");
                return;
            }
        }

        match lower.as_str() {
            "mstop" => {
                self.say("All motors stopped.");
                return;
            }
            "mpos" => {
                let [m1, m2] = self.positions;
                let (min, max) = (self.min_position, self.max_position);
                self.say(format!("[MPOS] M1:{} M2:{} MIN:{} MAX:{}", m1, m2, min, max));
                return;
            }
            "mreset" => {
                self.positions = [0, 0];
                self.say("[MRESET] Motor positions reset to 0");
                return;
            }
            "munlock" => {
                self.limits_enforced = false;
                self.say("[MUNLOCK] Position limits disabled");
                return;
            }
            "mlock" => {
                self.limits_enforced = true;
                self.say("[MLOCK] Position limits enabled");
                return;
            }
            _ => {}
        }

        if let Some(arg) = lower.strip_prefix("mspeed ") {
            let rpm = parse_leading_int(arg);
            if (1..=15).contains(&rpm) {
                self.speed_rpm = rpm as u32;
                self.say(format!("Motor speed set to {} RPM", rpm));
            } else {
                self.say("Invalid speed. Use 1-15 RPM.");
            }
            return;
        }

        self.say(format!("Unknown command: '{}'. Type 'help' for menu.", input));
    }
}

/// Parse a leading signed integer the way the firmware's `toInt` does:
/// leading whitespace skipped, digits read until the first non-digit, 0 when
/// nothing parses.
fn parse_leading_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|v| v * sign).unwrap_or(0)
}

/// Handle to a simulated controller shared by every transport opened on it
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: ThreadSafe<SimulatedState>,
}

impl SimulatedDevice {
    /// Create a device in its power-on state
    pub fn new() -> Self {
        Self::with_state(SimulatedState::default())
    }

    /// Create a device from an explicit starting state
    pub fn with_state(state: SimulatedState) -> Self {
        Self {
            state: thread_safe(state),
        }
    }

    /// Open a transport; the device reboots and prints its banner
    pub fn open(&self, name: impl Into<String>) -> SimulatedTransport {
        {
            let mut state = self.state.lock();
            state.open_count += 1;
            state.boot();
        }
        SimulatedTransport {
            name: name.into(),
            state: self.state.clone(),
            closed: false,
        }
    }

    /// Snapshot of the device state
    pub fn snapshot(&self) -> SimulatedState {
        self.state.lock().clone()
    }

    /// Lines written to the device so far
    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    /// Firmware-convention motor positions
    pub fn positions(&self) -> [i64; 2] {
        self.state.lock().positions
    }

    /// Stop replying to commands
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Emit an unsolicited line, as a debug print from the firmware would
    pub fn inject(&self, line: impl Into<String>) {
        self.state.lock().say(line);
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// A transport opened on a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimulatedTransport {
    name: String,
    state: ThreadSafe<SimulatedState>,
    closed: bool,
}

impl SimulatedTransport {
    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        Ok(())
    }
}

impl LineTransport for SimulatedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
        }
        state.handle(text);
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<String>> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        Ok(state.outbox.drain(..).collect())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        let mut state = self.state.lock();
        state.open_count = state.open_count.saturating_sub(1);
        Ok(())
    }
}
