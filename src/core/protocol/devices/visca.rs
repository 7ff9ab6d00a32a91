//! Sony VISCA block camera
//!
//! Requests are `8x category payload.. FF`; replies are `y0 status data.. FF`
//! where the status high nibble is 4 (ACK), 5 (completion) or 6 (error, with
//! the error code as the first data byte).

use std::time::Duration;

use super::{DeviceFamily, DeviceProfile, ResponseTiming};
use crate::core::protocol::frame_spec::{FieldLayout, FrameSpec, LengthEncoding};
use crate::core::protocol::framing::Command;
use crate::core::protocol::status::{DeviceStatus, StatusTable};

/// Message terminator
pub const TERMINATOR: u8 = 0xFF;
/// Command category
pub const CATEGORY_COMMAND: u8 = 0x01;
/// Inquiry category
pub const CATEGORY_INQUIRY: u8 = 0x09;
/// Acknowledge nibble
pub const ACK: u8 = 0x40;
/// Completion nibble
pub const COMPLETION: u8 = 0x50;
/// Error nibble; the error code follows
pub const ERROR: u8 = 0x60;

const MAX_MESSAGE: usize = 16;

/// Request layout for camera `address` (1..=7)
#[must_use]
pub fn request_spec(address: u8) -> FrameSpec {
    FrameSpec {
        name: "visca-request".into(),
        header: vec![0x80 | (address & 0x07)],
        layout: FieldLayout {
            function: Some(1),
            status: None,
            payload: 2,
        },
        length: LengthEncoding::Terminator { byte: TERMINATOR },
        checksums: Vec::new(),
        min_len: 3,
        max_len: MAX_MESSAGE,
    }
}

/// Reply layout for camera `address`
#[must_use]
pub fn response_spec(address: u8) -> FrameSpec {
    FrameSpec {
        name: "visca-reply".into(),
        header: vec![0x80 | (((address & 0x07) + 8) << 4)],
        layout: FieldLayout {
            function: None,
            status: Some(1),
            payload: 2,
        },
        length: LengthEncoding::Terminator { byte: TERMINATOR },
        checksums: Vec::new(),
        min_len: 3,
        max_len: MAX_MESSAGE,
    }
}

/// Device profile
#[must_use]
pub fn profile(address: u8) -> DeviceProfile {
    DeviceProfile {
        family: DeviceFamily::Visca,
        request: request_spec(address),
        response: response_spec(address),
        status: StatusTable::new(&[ACK, COMPLETION], &[])
            .with_mask(0xF0)
            .with_details(
                ERROR,
                &[
                    (0x01, DeviceStatus::ByteCountMismatch),
                    (0x02, DeviceStatus::UndefinedFunctionCode),
                    (0x03, DeviceStatus::Busy),
                    (0x04, DeviceStatus::CommandTimeout),
                    (0x05, DeviceStatus::NotReady),
                    (0x41, DeviceStatus::NotReady),
                ],
            ),
        timing: ResponseTiming::default()
            .max_wait(Duration::from_millis(500))
            .idle_quiet(Duration::from_millis(50)),
    }
}

// ============ Commands ============

/// Power the camera on
#[must_use]
pub fn power_on() -> Command {
    Command::new(CATEGORY_COMMAND, vec![0x04, 0x00, 0x02])
}

/// Power the camera off
#[must_use]
pub fn power_off() -> Command {
    Command::new(CATEGORY_COMMAND, vec![0x04, 0x00, 0x03])
}

/// Stop zooming
#[must_use]
pub fn zoom_stop() -> Command {
    Command::new(CATEGORY_COMMAND, vec![0x04, 0x07, 0x00])
}

/// Zoom in at `speed` (0..=7)
#[must_use]
pub fn zoom_tele(speed: u8) -> Command {
    Command::new(CATEGORY_COMMAND, vec![0x04, 0x07, 0x20 | (speed & 0x07)])
}

/// Zoom out at `speed` (0..=7)
#[must_use]
pub fn zoom_wide(speed: u8) -> Command {
    Command::new(CATEGORY_COMMAND, vec![0x04, 0x07, 0x30 | (speed & 0x07)])
}

/// Ask for the zoom position
#[must_use]
pub fn zoom_inquiry() -> Command {
    Command::new(CATEGORY_INQUIRY, vec![0x04, 0x47])
}

/// Zoom position from an inquiry reply (four nibbles)
#[must_use]
pub fn zoom_position(payload: &[u8]) -> Option<u16> {
    let nibbles = payload.get(..4)?;
    Some(
        nibbles
            .iter()
            .fold(0u16, |acc, &n| (acc << 4) | u16::from(n & 0x0F)),
    )
}
