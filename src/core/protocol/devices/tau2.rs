//! FLIR TAU2 thermal core
//!
//! Frame: `6E status reserved fn lenHi lenLo crc1Hi crc1Lo payload.. crc2Hi crc2Lo`.
//! CRC1 covers the six header bytes, CRC2 everything before it. Requests use
//! the same layout with the status byte zeroed.

use std::time::Duration;

use serde::Serialize;

use super::{be_i16, DeviceFamily, DeviceProfile, ResponseTiming};
use crate::core::protocol::checksum::ChecksumAlgorithm;
use crate::core::protocol::frame_spec::{
    ByteOrder, ChecksumSpec, Coverage, FieldLayout, FrameSpec, LengthEncoding, Placement,
};
use crate::core::protocol::framing::Command;
use crate::core::protocol::status::{DeviceStatus, StatusTable};

/// Line speed of the camera's command port
pub const BAUD_RATE: u32 = 921_600;

/// Process code byte that starts every frame
pub const PROCESS_CODE: u8 = 0x6E;

/// Largest payload accepted on the wire
pub const MAX_PAYLOAD: usize = 512;

/// No-op
pub const NO_OP: u8 = 0x00;
/// Restore factory defaults
pub const SET_DEFAULTS: u8 = 0x01;
/// Reboot the camera
pub const CAMERA_RESET: u8 = 0x02;
/// Firmware and serial number
pub const GET_REVISION: u8 = 0x05;
/// Camera status word
pub const STATUS_REQUEST: u8 = 0x06;
/// Gain mode
pub const GAIN_MODE: u8 = 0x0A;
/// Flat-field correction mode
pub const FFC_MODE_SELECT: u8 = 0x0B;
/// Run a flat-field correction now
pub const DO_FFC: u8 = 0x0C;
/// Flat-field correction period
pub const FFC_PERIOD: u8 = 0x0D;
/// Digital zoom / video mode
pub const VIDEO_MODE: u8 = 0x0F;
/// Colour palette
pub const VIDEO_LUT: u8 = 0x10;
/// Automatic gain control algorithm
pub const AGC_TYPE: u8 = 0x13;
/// Contrast
pub const CONTRAST: u8 = 0x14;
/// Brightness
pub const BRIGHTNESS: u8 = 0x15;
/// Focal plane array temperature
pub const READ_TEMP_SENSOR: u8 = 0x20;
/// Digital pan and tilt
pub const PAN_AND_TILT: u8 = 0x70;

/// Video mode argument enabling 2x digital zoom
pub const VIDEO_MODE_ZOOM: u16 = 0x0004;
/// Video mode argument for the unzoomed image
pub const VIDEO_MODE_NORMAL: u16 = 0x0000;

/// Frame layout shared by requests and replies
#[must_use]
pub fn frame_spec() -> FrameSpec {
    FrameSpec {
        name: "tau2".into(),
        header: vec![PROCESS_CODE],
        layout: FieldLayout {
            function: Some(3),
            status: Some(1),
            payload: 8,
        },
        length: LengthEncoding::Field {
            offset: 4,
            width: 2,
            order: ByteOrder::Big,
        },
        checksums: vec![
            ChecksumSpec {
                algorithm: ChecksumAlgorithm::Crc16Ccitt,
                coverage: Coverage::Span { start: 0, end: 6 },
                placement: Placement::At(6),
            },
            ChecksumSpec {
                algorithm: ChecksumAlgorithm::Crc16Ccitt,
                coverage: Coverage::UpToPlacement { start: 0 },
                placement: Placement::FromEnd(2),
            },
        ],
        min_len: 10,
        max_len: 8 + MAX_PAYLOAD + 2,
    }
}

/// Status codes reported in byte 1 of a reply
#[must_use]
pub fn status_table() -> StatusTable {
    StatusTable::new(
        &[0x00],
        &[
            (0x01, DeviceStatus::Busy),
            (0x02, DeviceStatus::NotReady),
            (0x03, DeviceStatus::DataOutOfRange),
            (0x04, DeviceStatus::ChecksumError),
            (0x05, DeviceStatus::UndefinedProcessCode),
            (0x06, DeviceStatus::UndefinedFunctionCode),
            (0x07, DeviceStatus::CommandTimeout),
            (0x09, DeviceStatus::ByteCountMismatch),
            (0x0A, DeviceStatus::FeatureNotEnabled),
        ],
    )
}

/// Device profile
#[must_use]
pub fn profile() -> DeviceProfile {
    DeviceProfile {
        family: DeviceFamily::Tau2,
        request: frame_spec(),
        response: frame_spec(),
        status: status_table(),
        timing: ResponseTiming::default().max_wait(Duration::from_secs(2)),
    }
}

// ============ Commands ============

/// Request the camera status word
#[must_use]
pub fn status_request() -> Command {
    Command::bare(STATUS_REQUEST)
}

/// Read the FPA temperature sensor
#[must_use]
pub fn read_temperature() -> Command {
    Command::new(READ_TEMP_SENSOR, vec![0x00, 0x00])
}

/// Trigger a flat-field correction
#[must_use]
pub fn do_ffc() -> Command {
    Command::bare(DO_FFC)
}

/// Select a video mode
#[must_use]
pub fn video_mode(mode: u16) -> Command {
    Command::new(VIDEO_MODE, mode.to_be_bytes().to_vec())
}

/// Select a colour palette
#[must_use]
pub fn video_lut(lut: u16) -> Command {
    Command::new(VIDEO_LUT, lut.to_be_bytes().to_vec())
}

/// Move the digital pan/tilt window
#[must_use]
pub fn pan_and_tilt(tilt: i16, pan: i16) -> Command {
    let mut payload = tilt.to_be_bytes().to_vec();
    payload.extend_from_slice(&pan.to_be_bytes());
    Command::new(PAN_AND_TILT, payload)
}

// ============ Replies ============

/// Digital pan/tilt position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PanTilt {
    /// Tilt offset
    pub tilt: i16,
    /// Pan offset
    pub pan: i16,
}

/// FPA temperature in degrees Celsius (reported in tenths)
#[must_use]
pub fn fpa_temperature(payload: &[u8]) -> Option<f32> {
    be_i16(payload, 0).map(|raw| f32::from(raw) / 10.0)
}

/// Camera status byte from a status reply
#[must_use]
pub fn camera_status(payload: &[u8]) -> Option<u8> {
    payload.first().copied()
}

/// Pan/tilt echo
#[must_use]
pub fn pan_tilt(payload: &[u8]) -> Option<PanTilt> {
    Some(PanTilt {
        tilt: be_i16(payload, 0)?,
        pan: be_i16(payload, 2)?,
    })
}
