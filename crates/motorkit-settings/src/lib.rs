//! MotorKit Settings Crate
//!
//! Handles application configuration and its persistence.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, Config, ConnectionSettings, MotionSettings, TimingSettings,
    CONFIG_DIR_NAME, CONFIG_FILE_NAME,
};
pub use error::{Result, SettingsError};
