//! Configuration and settings management for MotorKit
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats stored in the platform configuration directory.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (preferred port, baud rate, boot settle windows)
//! - Timing settings (reply windows per command class)
//! - Motion settings (step amounts, axis orientation, tracking)

use crate::error::{Result, SettingsError};
use motorkit_core::{Axis, TrackingMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory under the platform config dir holding MotorKit files
pub const CONFIG_DIR_NAME: &str = "motorkit";

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Preferred serial port, used when present in the port list
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Serial read timeout in milliseconds
    pub timeout_ms: u64,
    /// First wait after opening, while the controller reboots
    pub boot_settle_ms: u64,
    /// Second wait before discarding the boot banner
    pub boot_drain_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "COM4".to_string(),
            baud_rate: 115200,
            timeout_ms: 10,
            boot_settle_ms: 3000,
            boot_drain_ms: 500,
        }
    }
}

/// Reply windows, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Default window after a command
    pub base_wait_ms: u64,
    /// Window per step of travel for moves
    pub per_step_wait_ms: u64,
    /// Window after entering test mode
    pub privileged_wait_ms: u64,
    /// Window after starting IMU initialisation
    pub imu_init_wait_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            base_wait_ms: 500,
            per_step_wait_ms: 3,
            privileged_wait_ms: 1000,
            imu_init_wait_ms: 2000,
        }
    }
}

/// Motion preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Step amounts offered as presets
    pub step_presets: Vec<i64>,
    /// Step amount selected at startup
    pub default_step: i64,
    /// Smallest custom step amount
    pub min_step: i64,
    /// Largest custom step amount
    pub max_step: i64,
    /// Axis numbers whose wire direction is negated
    pub mirrored_axes: Vec<u8>,
    /// How positions follow moves
    pub tracking: TrackingMode,
    /// Initialise the IMU while connecting
    pub init_imu: bool,
    /// Lift the firmware's soft position limits while connecting
    pub unlock_limits: bool,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            step_presets: vec![10, 50, 100, 500, 1000],
            default_step: 100,
            min_step: 1,
            max_step: 10_000,
            mirrored_axes: vec![2],
            tracking: TrackingMode::Optimistic,
            init_imu: true,
            unlock_limits: true,
        }
    }
}

impl MotionSettings {
    /// Mirrored axes, skipping numbers that name no axis
    pub fn mirrored(&self) -> Vec<Axis> {
        self.mirrored_axes
            .iter()
            .filter_map(|n| Axis::from_number(*n))
            .collect()
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Reply windows
    pub timing: TimingSettings,
    /// Motion preferences
    pub motion: MotionSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format> {
    if path.extension().is_some_and(|ext| ext == "json") {
        Ok(Format::Json)
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        Ok(Format::Toml)
    } else {
        Err(SettingsError::UnsupportedFormat)
    }
}

/// `<config dir>/motorkit/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| {
            SettingsError::ConfigDirectory("no configuration directory on this platform".into())
        })
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)
                .map_err(|e| SettingsError::LoadError(format!("Invalid JSON config: {}", e)))?,
            Format::Toml => toml::from_str(&content)
                .map_err(|e| SettingsError::LoadError(format!("Invalid TOML config: {}", e)))?,
        };

        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Load `path`, or the default path when none is given
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is
    /// an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid(
                "connection.baud_rate",
                "Baud rate must be > 0",
            ));
        }

        if self.timing.base_wait_ms == 0 {
            return Err(SettingsError::invalid(
                "timing.base_wait_ms",
                "Base wait must be > 0",
            ));
        }

        let motion = &self.motion;
        if motion.min_step < 1 || motion.min_step > motion.max_step {
            return Err(SettingsError::invalid(
                "motion.min_step",
                format!(
                    "Step bounds {}..={} must be positive and ordered",
                    motion.min_step, motion.max_step
                ),
            ));
        }

        let in_range = |v: i64| (motion.min_step..=motion.max_step).contains(&v);
        if !in_range(motion.default_step) {
            return Err(SettingsError::invalid(
                "motion.default_step",
                format!(
                    "{} outside {}..={}",
                    motion.default_step, motion.min_step, motion.max_step
                ),
            ));
        }

        if let Some(preset) = motion.step_presets.iter().find(|p| !in_range(**p)) {
            return Err(SettingsError::invalid(
                "motion.step_presets",
                format!(
                    "{} outside {}..={}",
                    preset, motion.min_step, motion.max_step
                ),
            ));
        }

        if let Some(n) = motion
            .mirrored_axes
            .iter()
            .find(|n| Axis::from_number(**n).is_none())
        {
            return Err(SettingsError::invalid(
                "motion.mirrored_axes",
                format!("No motor {}", n),
            ));
        }

        Ok(())
    }
}
