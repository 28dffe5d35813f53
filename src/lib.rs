//! # MotorKit
//!
//! Operator console for a two-axis stepper motor controller on a serial
//! link. The operator jogs each motor, records IN/OUT travel limits, and
//! reads off the `config.h` values the firmware needs.
//!
//! ## Architecture
//!
//! MotorKit is organized as a workspace with multiple crates:
//!
//! 1. **motorkit-core** - Axis data model, errors, events
//! 2. **motorkit-communication** - Transports, dispatcher, firmware commands, session
//! 3. **motorkit-settings** - Configuration file handling
//! 4. **motorkit** - Console binary that integrates all crates

pub mod console;

pub use motorkit_core::{
    Axis, AxisState, ConnectionError, ControllerEvent, Direction, Error, EventDispatcher,
    LimitKind, LinkState, LogLine, Result, SessionError, TrackingMode, TransportError,
};

pub use motorkit_communication::{
    list_ports, BootSettle, CompletionReceiver, ConnectionParams, Connector,
    LimitsSummary, MotorSession, SerialConnector, SerialPortInfo, SessionOptions,
    SimulatedConnector, SimulatedDevice, WaitPolicy,
};

pub use motorkit_settings::{default_config_path, Config, SettingsError};

use motorkit_core::{AxisOrientation, Orientation};
use std::path::Path;
use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support (warnings and above otherwise)
/// - stderr output, or `log_file` when given, so the console stays readable
pub fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let fmt_layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        None => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

/// Build session options from a loaded configuration
pub fn session_options(config: &Config) -> SessionOptions {
    let connection = &config.connection;
    let params = ConnectionParams {
        port: connection.port.clone(),
        baud_rate: connection.baud_rate,
        timeout_ms: connection.timeout_ms,
        boot_settle: BootSettle {
            first: Duration::from_millis(connection.boot_settle_ms),
            second: Duration::from_millis(connection.boot_drain_ms),
        },
        ..ConnectionParams::default()
    };

    let timing = &config.timing;
    let wait = WaitPolicy {
        base: Duration::from_millis(timing.base_wait_ms),
        per_step: Duration::from_millis(timing.per_step_wait_ms),
        privileged: Duration::from_millis(timing.privileged_wait_ms),
        imu_init: Duration::from_millis(timing.imu_init_wait_ms),
    };

    let motion = &config.motion;
    let orientation = motion
        .mirrored()
        .into_iter()
        .fold(AxisOrientation::normal(), |o, axis| {
            o.with(axis, Orientation::Mirrored)
        });

    SessionOptions {
        params,
        wait,
        orientation,
        tracking: motion.tracking,
        init_imu: motion.init_imu,
        unlock_limits: motion.unlock_limits,
        step_presets: motion.step_presets.clone(),
        default_step: motion.default_step,
        min_step: motion.min_step,
        max_step: motion.max_step,
    }
}
