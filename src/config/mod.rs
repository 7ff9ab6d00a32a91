//! Configuration module
//!
//! Handles the device table: which serial port each device sits on, its
//! family, address and timing overrides.

mod settings;

pub use settings::{ConfigError, DeviceConfig, ProbeConfig, TimingOverride};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "hwprobe", "hwprobe").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the device table
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("devices.toml"))
}
