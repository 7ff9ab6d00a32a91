//! Built-in device families
//!
//! Each family supplies a [`DeviceProfile`]: request and response frame
//! layouts, a status table and the timing used to collect replies. Adding a
//! device means adding a profile, not codec code.

pub mod lrf;
pub mod pelco_d;
pub mod tau2;
pub mod visca;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame_spec::{FrameSpec, LengthEncoding};
use super::status::StatusTable;

/// Known device families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceFamily {
    /// FLIR TAU2 thermal core, dual CRC16 frames
    Tau2,
    /// Jioptics laser rangefinder, 9-byte sum8 frames
    Lrf,
    /// Sony VISCA block camera
    Visca,
    /// Pelco-D pan/tilt/zoom
    #[serde(alias = "pelco")]
    PelcoD,
}

impl DeviceFamily {
    /// Get all families
    #[must_use]
    pub fn all() -> &'static [DeviceFamily] {
        &[DeviceFamily::Tau2, DeviceFamily::Lrf, DeviceFamily::Visca, DeviceFamily::PelcoD]
    }

    /// Get name of family
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DeviceFamily::Tau2 => "TAU2",
            DeviceFamily::Lrf => "LRF",
            DeviceFamily::Visca => "VISCA",
            DeviceFamily::PelcoD => "Pelco-D",
        }
    }

    /// Default line speed
    #[must_use]
    pub fn default_baud(&self) -> u32 {
        match self {
            DeviceFamily::Tau2 => tau2::BAUD_RATE,
            DeviceFamily::Lrf => lrf::BAUD_RATE,
            DeviceFamily::Visca | DeviceFamily::PelcoD => 9600,
        }
    }

    /// Build the profile; `address` is used by addressed protocols only
    #[must_use]
    pub fn profile(&self, address: u8) -> DeviceProfile {
        match self {
            DeviceFamily::Tau2 => tau2::profile(),
            DeviceFamily::Lrf => lrf::profile(),
            DeviceFamily::Visca => visca::profile(address),
            DeviceFamily::PelcoD => pelco_d::profile(address),
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tau2" | "night" | "thermal" => Ok(Self::Tau2),
            "lrf" => Ok(Self::Lrf),
            "visca" | "day" => Ok(Self::Visca),
            "pelco" | "pelco-d" | "pelcod" => Ok(Self::PelcoD),
            other => Err(format!("unknown device family '{other}'")),
        }
    }
}

/// Timeouts for one request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseTiming {
    /// Upper bound on waiting for a reply
    pub max_wait: Duration,
    /// Silence that ends a reply once bytes have arrived
    pub idle_quiet: Duration,
    /// Upper bound on writing a request
    pub write_timeout: Duration,
    /// Interval between channel polls
    pub poll_interval: Duration,
}

impl Default for ResponseTiming {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(1),
            idle_quiet: Duration::from_millis(100),
            write_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl ResponseTiming {
    /// Set maximum wait
    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set idle quiet period
    #[must_use]
    pub fn idle_quiet(mut self, idle_quiet: Duration) -> Self {
        self.idle_quiet = idle_quiet;
        self
    }

    /// Set write timeout
    #[must_use]
    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Set poll interval
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// How a reply is collected from the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Accumulate until the line goes quiet
    UntilIdle,
    /// Read exactly this many bytes
    Exact(usize),
}

/// Everything needed to talk to one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Device family
    pub family: DeviceFamily,
    /// Layout of frames we send
    pub request: FrameSpec,
    /// Layout of frames we receive
    pub response: FrameSpec,
    /// Status code meanings
    pub status: StatusTable,
    /// Default timing
    pub timing: ResponseTiming,
}

impl DeviceProfile {
    /// Reply collection strategy, chosen from the response layout
    #[must_use]
    pub fn read_strategy(&self) -> ReadStrategy {
        match self.response.length {
            LengthEncoding::Fixed { total } => ReadStrategy::Exact(total),
            _ => ReadStrategy::UntilIdle,
        }
    }

    /// Replace the default timing
    #[must_use]
    pub fn with_timing(mut self, timing: ResponseTiming) -> Self {
        self.timing = timing;
        self
    }
}

/// Signed big-endian 16-bit value at `offset`
pub(crate) fn be_i16(payload: &[u8], offset: usize) -> Option<i16> {
    let bytes = payload.get(offset..offset + 2)?;
    Some(i16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Unsigned big-endian 16-bit value at `offset`
pub(crate) fn be_u16(payload: &[u8], offset: usize) -> Option<u16> {
    let bytes = payload.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_strategy_follows_length_rule() {
        assert_eq!(DeviceFamily::Lrf.profile(0).read_strategy(), ReadStrategy::Exact(9));
        assert_eq!(DeviceFamily::PelcoD.profile(1).read_strategy(), ReadStrategy::Exact(7));
        assert_eq!(DeviceFamily::Tau2.profile(0).read_strategy(), ReadStrategy::UntilIdle);
        assert_eq!(DeviceFamily::Visca.profile(1).read_strategy(), ReadStrategy::UntilIdle);
    }

    #[test]
    fn test_family_parsing() {
        assert_eq!("tau2".parse::<DeviceFamily>(), Ok(DeviceFamily::Tau2));
        assert_eq!("Pelco-D".parse::<DeviceFamily>(), Ok(DeviceFamily::PelcoD));
        assert!("modbus".parse::<DeviceFamily>().is_err());
    }

    #[test]
    fn test_profiles_match_family() {
        for family in DeviceFamily::all() {
            assert_eq!(family.profile(1).family, *family);
        }
    }

    #[test]
    fn test_be_helpers() {
        assert_eq!(be_i16(&[0xFF, 0x38], 0), Some(-200));
        assert_eq!(be_u16(&[0x00, 0x01, 0xF4], 1), Some(500));
        assert_eq!(be_u16(&[0x01], 0), None);
    }
}
