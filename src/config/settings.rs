//! Device table and per-device settings

use crate::core::protocol::{DeviceFamily, DeviceProfile, ResponseTiming, SpecError};
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// File could not be written
    #[error("Failed to write {path}: {source}")]
    Write {
        /// File path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Invalid config {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Cause
        source: toml::de::Error,
    },

    /// Config could not be serialised
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Name not in the device table
    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    /// Device entry is inconsistent
    #[error("Device '{name}': {reason}")]
    Invalid {
        /// Device name
        name: String,
        /// What is wrong
        reason: String,
    },
}

/// Timing values that replace a family's defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingOverride {
    /// Upper bound on waiting for a reply
    pub max_wait_ms: Option<u64>,
    /// Silence that ends a reply
    pub idle_quiet_ms: Option<u64>,
    /// Upper bound on writing a request
    pub write_timeout_ms: Option<u64>,
    /// Channel poll interval
    pub poll_interval_ms: Option<u64>,
}

impl TimingOverride {
    /// Apply the set values on top of `base`
    #[must_use]
    pub fn apply(&self, base: ResponseTiming) -> ResponseTiming {
        let mut timing = base;
        if let Some(ms) = self.max_wait_ms {
            timing.max_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = self.idle_quiet_ms {
            timing.idle_quiet = Duration::from_millis(ms);
        }
        if let Some(ms) = self.write_timeout_ms {
            timing.write_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            timing.poll_interval = Duration::from_millis(ms);
        }
        timing
    }
}

/// One configured device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device family
    pub family: DeviceFamily,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Camera address for addressed protocols (VISCA, Pelco-D)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u8>,
    /// Interval between readings in `poll`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Shortest distance the rangefinder reports as valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_range_m: Option<u16>,
    /// Longest distance the rangefinder reports as valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_range_m: Option<u16>,
    /// Port settings
    pub serial: SerialConfig,
    /// Timing overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingOverride>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl DeviceConfig {
    /// Create a device on `port` at the family's default baud rate
    pub fn new(family: DeviceFamily, port: &str) -> Self {
        Self {
            family,
            description: None,
            address: None,
            poll_interval_ms: default_poll_interval_ms(),
            min_range_m: None,
            max_range_m: None,
            serial: SerialConfig::new(port, family.default_baud()),
            timing: None,
        }
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Set the camera address
    #[must_use]
    pub fn address(mut self, address: u8) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the accepted distance window
    #[must_use]
    pub fn range(mut self, min_m: u16, max_m: u16) -> Self {
        self.min_range_m = Some(min_m);
        self.max_range_m = Some(max_m);
        self
    }

    /// Address used on the wire
    pub fn wire_address(&self) -> u8 {
        self.address.unwrap_or(1)
    }

    /// Profile with timing overrides applied
    pub fn profile(&self) -> DeviceProfile {
        let profile = self.family.profile(self.wire_address());
        match self.timing {
            Some(overrides) => {
                let timing = overrides.apply(profile.timing);
                profile.with_timing(timing)
            }
            None => profile,
        }
    }

    /// Interval between readings in `poll`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Whether a distance lies in the configured window
    pub fn in_range(&self, distance_m: u16) -> bool {
        self.min_range_m.is_none_or(|min| distance_m >= min) && self.max_range_m.is_none_or(|max| distance_m <= max)
    }

    /// Check the entry for consistency
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending setting.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            name: name.to_string(),
            reason,
        };

        match (self.family, self.address) {
            (DeviceFamily::Visca, Some(addr)) if !(1..=7).contains(&addr) => {
                return Err(invalid(format!("VISCA address {addr} outside 1..=7")));
            }
            (DeviceFamily::PelcoD, Some(0)) => return Err(invalid("Pelco-D address 0 is not valid".into())),
            _ => {}
        }
        if let (Some(min), Some(max)) = (self.min_range_m, self.max_range_m) {
            if min > max {
                return Err(invalid(format!("min_range_m {min} exceeds max_range_m {max}")));
            }
        }
        if self.serial.baud_rate == 0 {
            return Err(invalid("baud_rate must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be positive".into()));
        }

        let profile = self.profile();
        profile
            .request
            .validate()
            .and_then(|()| profile.response.validate())
            .map_err(|e: SpecError| invalid(e.to_string()))
    }
}

/// Device table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Devices by name
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        let mut devices = BTreeMap::new();
        devices.insert(
            "night-camera".to_string(),
            DeviceConfig::new(DeviceFamily::Tau2, "/dev/ttyUSB0").description("TAU2 thermal core"),
        );
        devices.insert(
            "lrf".to_string(),
            DeviceConfig::new(DeviceFamily::Lrf, "/dev/ttyUSB1")
                .description("Laser rangefinder")
                .range(50, 4000),
        );
        devices.insert(
            "day-camera".to_string(),
            DeviceConfig::new(DeviceFamily::Visca, "/dev/ttyUSB2")
                .description("VISCA block camera")
                .address(1),
        );
        Self { devices }
    }
}

impl ProbeConfig {
    /// Load the device table
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present, else the built-in table.
    ///
    /// # Errors
    ///
    /// Read, parse or validation failures.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => match super::default_config_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => {
                    tracing::debug!("no config file, using built-in devices");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Explicit path, else the default location
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoConfigDir`] if neither is available.
    pub fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        path.map(Path::to_path_buf)
            .or_else(super::default_config_path)
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load and validate a specific file
    ///
    /// # Errors
    ///
    /// Read, parse or validation failures.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), devices = config.devices.len(), "config loaded");
        Ok(config)
    }

    /// Save config to file, creating parent directories
    ///
    /// # Errors
    ///
    /// Serialisation or write failures.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)
    }

    /// Look up a device by name
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownDevice`] if the name is not configured.
    pub fn device(&self, name: &str) -> Result<&DeviceConfig, ConfigError> {
        self.devices
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDevice(name.to_string()))
    }

    /// Validate every device
    ///
    /// # Errors
    ///
    /// The first invalid entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.devices
            .iter()
            .try_for_each(|(name, device)| device.validate(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProbeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.device("night-camera").unwrap().serial.baud_rate, 921_600);
        assert_eq!(config.device("lrf").unwrap().serial.baud_rate, 115_200);
        assert_eq!(config.device("day-camera").unwrap().serial.baud_rate, 9600);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("devices.toml");

        let mut config = ProbeConfig::default();
        config.devices.get_mut("lrf").unwrap().timing = Some(TimingOverride {
            max_wait_ms: Some(1500),
            ..TimingOverride::default()
        });
        config.save(&path).unwrap();

        let loaded = ProbeConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.device("lrf").unwrap().profile().timing.max_wait,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_parse_minimal_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.toml");
        std::fs::write(
            &path,
            r#"
[devices.ptz]
family = "pelco"
address = 2

[devices.ptz.serial]
port = "/dev/ttyS3"
baud_rate = 2400
"#,
        )
        .unwrap();

        let config = ProbeConfig::load(Some(&path)).unwrap();
        let ptz = config.device("ptz").unwrap();
        assert_eq!(ptz.family, DeviceFamily::PelcoD);
        assert_eq!(ptz.serial.data_bits, 8);
        assert_eq!(ptz.poll_interval(), Duration::from_secs(1));
        assert_eq!(ptz.profile().request.header, vec![0xFF, 0x02, 0x00]);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(ProbeConfig::load(Some(&missing)), Err(ConfigError::Read { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[devices.x]\nfamily = \"modbus\"\n").unwrap();
        assert!(matches!(ProbeConfig::load(Some(&broken)), Err(ConfigError::Parse { .. })));

        let bad_address = dir.path().join("bad.toml");
        std::fs::write(
            &bad_address,
            "[devices.cam]\nfamily = \"visca\"\naddress = 9\n[devices.cam.serial]\nport = \"COM1\"\n",
        )
        .unwrap();
        assert!(matches!(
            ProbeConfig::load(Some(&bad_address)),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_device() {
        let err = ProbeConfig::default().device("sonar").unwrap_err();
        assert_eq!(err.to_string(), "Unknown device 'sonar'");
    }

    #[test]
    fn test_range_window() {
        let lrf = DeviceConfig::new(DeviceFamily::Lrf, "COM4").range(50, 4000);
        assert!(lrf.in_range(500));
        assert!(!lrf.in_range(20));
        assert!(!lrf.in_range(4500));
        assert!(DeviceConfig::new(DeviceFamily::Lrf, "COM4").in_range(0));
    }
}
