//! Jioptics laser rangefinder
//!
//! Every frame is 9 bytes: `EE 07 code p0 p1 p2 p3 p4 sum`, where `sum` is
//! the 8-bit sum of the code and the five parameter bytes. Replies reuse
//! the layout; their parameter bytes are the payload decoded below.

use std::time::Duration;

use serde::Serialize;

use super::{be_u16, DeviceFamily, DeviceProfile, ResponseTiming};
use crate::core::protocol::checksum::ChecksumAlgorithm;
use crate::core::protocol::frame_spec::{ChecksumSpec, Coverage, FieldLayout, FrameSpec, LengthEncoding, Placement};
use crate::core::protocol::framing::Command;
use crate::core::protocol::status::StatusTable;

/// Default line speed
pub const BAUD_RATE: u32 = 115_200;

/// Frame start byte
pub const FRAME_HEADER: u8 = 0xEE;
/// Device code of the rangefinder
pub const DEVICE_CODE: u8 = 0x07;
/// Frame size
pub const PACKET_SIZE: usize = 9;

/// Built-in test
pub const SELF_CHECK: u8 = 0x01;
/// One measurement
pub const SINGLE_RANGING: u8 = 0x02;
/// Measure continuously until stopped
pub const CONTINUOUS_RANGING: u8 = 0x04;
/// Stop continuous ranging
pub const STOP_RANGING: u8 = 0x05;
/// Module temperature
pub const TEMPERATURE: u8 = 0x06;
/// Accumulated laser pulse count
pub const LASER_COUNT: u8 = 0x0A;
/// Ranging reply, first alternate code
pub const RANGING_REPLY_B: u8 = 0x0B;
/// Ranging reply, second alternate code
pub const RANGING_REPLY_C: u8 = 0x0C;
/// Product id and firmware version
pub const PRODUCT_INFO: u8 = 0x10;

const FAULT: u8 = 0x01;
const NO_ECHO: u8 = 0x08;
const LASER_NOT_OUT: u8 = 0x10;
const OVER_TEMPERATURE: u8 = 0x20;

/// Frame layout shared by requests and replies
#[must_use]
pub fn frame_spec() -> FrameSpec {
    FrameSpec {
        name: "lrf".into(),
        header: vec![FRAME_HEADER, DEVICE_CODE],
        layout: FieldLayout {
            function: Some(2),
            status: None,
            payload: 3,
        },
        length: LengthEncoding::Fixed { total: PACKET_SIZE },
        checksums: vec![ChecksumSpec {
            algorithm: ChecksumAlgorithm::Sum8,
            coverage: Coverage::Span { start: 2, end: 8 },
            placement: Placement::At(8),
        }],
        min_len: PACKET_SIZE,
        max_len: PACKET_SIZE,
    }
}

/// Device profile
#[must_use]
pub fn profile() -> DeviceProfile {
    DeviceProfile {
        family: DeviceFamily::Lrf,
        request: frame_spec(),
        response: frame_spec(),
        status: StatusTable::permissive(),
        timing: ResponseTiming::default().max_wait(Duration::from_secs(1)),
    }
}

/// Command without parameters
#[must_use]
pub fn command(code: u8) -> Command {
    Command::bare(code).with_expected_len(PACKET_SIZE)
}

/// Health flags from a status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LrfFlags {
    /// Raw status byte
    pub raw: u8,
    /// Module fault
    pub fault: bool,
    /// No return echo
    pub no_echo: bool,
    /// Laser did not fire
    pub laser_not_out: bool,
    /// Over temperature
    pub over_temperature: bool,
}

impl LrfFlags {
    fn from_status(raw: u8, fault: bool) -> Self {
        Self {
            raw,
            fault,
            no_echo: raw & NO_ECHO != 0,
            laser_not_out: raw & LASER_NOT_OUT != 0,
            over_temperature: raw & OVER_TEMPERATURE != 0,
        }
    }
}

/// Decoded rangefinder reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LrfReading {
    /// Self-check result
    SelfCheck {
        /// Health flags
        flags: LrfFlags,
    },
    /// Distance measurement
    Range {
        /// Health flags
        flags: LrfFlags,
        /// Distance in metres
        distance_m: u16,
        /// Pulse count of this measurement
        pulses: u8,
        /// Distance is usable
        valid: bool,
    },
    /// Module temperature in degrees Celsius
    Temperature {
        /// Degrees Celsius
        celsius: i8,
    },
    /// Lifetime laser pulses
    LaserCount {
        /// Number of pulses
        pulses: u32,
    },
    /// Product identification
    ProductInfo {
        /// Product id
        id: u8,
        /// Firmware version as `major.minor`
        version: String,
    },
}

/// Decode the parameter bytes of a reply with the given code
///
/// Returns `None` for codes without data (e.g. stop) or unknown codes.
#[must_use]
pub fn parse_reply(code: u8, payload: &[u8]) -> Option<LrfReading> {
    if payload.len() < 5 {
        return None;
    }
    match code {
        SELF_CHECK => Some(LrfReading::SelfCheck {
            flags: LrfFlags::from_status(payload[1], payload[0] == FAULT),
        }),
        SINGLE_RANGING | CONTINUOUS_RANGING | RANGING_REPLY_B | RANGING_REPLY_C => {
            let status = payload[0];
            let flags = LrfFlags::from_status(status, status == FAULT);
            let distance_m = be_u16(payload, 2)?;
            Some(LrfReading::Range {
                flags,
                distance_m,
                pulses: payload[4],
                valid: distance_m > 0 && !flags.no_echo && !flags.fault,
            })
        }
        LASER_COUNT => {
            // Little-endian, in hundreds of pulses
            let base = u16::from_le_bytes([payload[2], payload[3]]);
            Some(LrfReading::LaserCount {
                pulses: u32::from(base) * 100,
            })
        }
        PRODUCT_INFO => Some(LrfReading::ProductInfo {
            id: payload[0],
            version: format!("{}.{}", payload[1] >> 4, payload[1] & 0x0F),
        }),
        TEMPERATURE => {
            // Sign-magnitude
            let raw = payload[1];
            let magnitude = i8::try_from(raw & 0x7F).unwrap_or(i8::MAX);
            Some(LrfReading::Temperature {
                celsius: if raw & 0x80 != 0 { -magnitude } else { magnitude },
            })
        }
        _ => None,
    }
}
