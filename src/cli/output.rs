//! Reading output
//!
//! Turns decoded frames into timestamped readings and prints them as text,
//! JSON lines or bare hex.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::protocol::devices::{lrf, pelco_d, tau2, visca};
use crate::core::protocol::{DecodedFrame, DeviceFamily};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Payload bytes as hex
    Hex,
}

/// Meaning of a reply payload, where the family and function are known
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Interpretation {
    /// TAU2 focal plane array temperature
    FpaTemperature {
        /// Degrees Celsius
        celsius: f32,
    },
    /// TAU2 camera status byte
    CameraStatus {
        /// Raw status
        code: u8,
    },
    /// TAU2 digital pan/tilt position
    PanTilt {
        /// Position
        position: tau2::PanTilt,
    },
    /// Rangefinder reply
    Rangefinder {
        /// Decoded reply
        reading: lrf::LrfReading,
    },
    /// Zoom lens position
    Zoom {
        /// Raw position
        position: u16,
        /// Horizontal field of view, when the lens model is known
        #[serde(skip_serializing_if = "Option::is_none")]
        hfov_deg: Option<f64>,
    },
    /// Focus lens position
    Focus {
        /// Raw position
        position: u16,
    },
}

impl Interpretation {
    /// Interpret `frame` as a reply from `family`
    pub fn of(family: DeviceFamily, frame: &DecodedFrame) -> Option<Self> {
        let payload = &frame.payload[..];
        match (family, frame.function_code) {
            (DeviceFamily::Tau2, Some(tau2::READ_TEMP_SENSOR)) => {
                tau2::fpa_temperature(payload).map(|celsius| Self::FpaTemperature { celsius })
            }
            (DeviceFamily::Tau2, Some(tau2::STATUS_REQUEST)) => {
                tau2::camera_status(payload).map(|code| Self::CameraStatus { code })
            }
            (DeviceFamily::Tau2, Some(tau2::PAN_AND_TILT)) => {
                tau2::pan_tilt(payload).map(|position| Self::PanTilt { position })
            }
            (DeviceFamily::Lrf, Some(code)) => {
                lrf::parse_reply(code, payload).map(|reading| Self::Rangefinder { reading })
            }
            (DeviceFamily::Visca, _) => visca::zoom_position(payload).map(|position| Self::Zoom {
                position,
                hfov_deg: None,
            }),
            (DeviceFamily::PelcoD, Some(pelco_d::ZOOM_REPLY)) => pelco_d::position(payload).map(|position| Self::Zoom {
                position,
                hfov_deg: Some(pelco_d::hfov_from_zoom(position)),
            }),
            (DeviceFamily::PelcoD, Some(pelco_d::FOCUS_REPLY)) => {
                pelco_d::position(payload).map(|position| Self::Focus { position })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FpaTemperature { celsius } => write!(f, "FPA {celsius:.1} C"),
            Self::CameraStatus { code } => write!(f, "camera status {code:#04x}"),
            Self::PanTilt { position } => write!(f, "tilt {} pan {}", position.tilt, position.pan),
            Self::Rangefinder { reading } => match reading {
                lrf::LrfReading::Range {
                    distance_m,
                    pulses,
                    valid: true,
                    ..
                } => write!(f, "range {distance_m} m ({pulses} pulses)"),
                lrf::LrfReading::Range { flags, .. } => write!(f, "no valid range (status {:#04x})", flags.raw),
                lrf::LrfReading::SelfCheck { flags } if flags.raw == 0 && !flags.fault => write!(f, "self-check ok"),
                lrf::LrfReading::SelfCheck { flags } => write!(f, "self-check failed (status {:#04x})", flags.raw),
                lrf::LrfReading::Temperature { celsius } => write!(f, "module {celsius} C"),
                lrf::LrfReading::LaserCount { pulses } => write!(f, "{pulses} laser pulses"),
                lrf::LrfReading::ProductInfo { id, version } => write!(f, "product {id:#04x} firmware {version}"),
            },
            Self::Zoom {
                position,
                hfov_deg: Some(hfov),
            } => write!(f, "zoom {position:#06x} (HFOV {hfov:.1} deg)"),
            Self::Zoom { position, hfov_deg: None } => write!(f, "zoom {position:#06x}"),
            Self::Focus { position } => write!(f, "focus {position:#06x}"),
        }
    }
}

/// One timestamped reply
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    /// Local time the reply was decoded
    pub timestamp: DateTime<Local>,
    /// Configured device name
    pub device: String,
    /// Device family
    pub family: DeviceFamily,
    /// Echoed function code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<u8>,
    /// Raw status byte
    pub status: u8,
    /// Payload as hex
    pub payload: String,
    /// Decoded meaning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Interpretation>,
}

impl Reading {
    /// Build a reading from a decoded frame, stamped now
    pub fn new(device: &str, family: DeviceFamily, frame: &DecodedFrame) -> Self {
        Self {
            timestamp: Local::now(),
            device: device.to_string(),
            family,
            function: frame.function_code,
            status: frame.status_code,
            payload: hex::encode_upper(&frame.payload),
            value: Interpretation::of(family, frame),
        }
    }

    /// Render in `format`
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => {
                let mut line = format!(
                    "{} {} [{}]",
                    self.timestamp.format("%H:%M:%S%.3f"),
                    self.device,
                    self.family
                );
                if let Some(function) = self.function {
                    line.push_str(&format!(" fn={function:#04x}"));
                }
                line.push_str(&format!(" status={:#04x} payload={}", self.status, spaced_hex(&self.payload)));
                if let Some(value) = &self.value {
                    line.push_str(&format!("  {value}"));
                }
                line
            }
            OutputFormat::Json => serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
            OutputFormat::Hex => spaced_hex(&self.payload),
        }
    }
}

fn spaced_hex(hex: &str) -> String {
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
