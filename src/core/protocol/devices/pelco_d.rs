//! Pelco-D pan/tilt/zoom control
//!
//! Seven-byte frames: `FF addr cmd1 cmd2 data1 data2 sum`, `sum` being the
//! 8-bit sum of bytes 1..6. Only the `cmd1 == 0` command set is modelled;
//! `cmd2` is the function code and the two data bytes are the payload.

use std::time::Duration;

use super::{be_u16, DeviceFamily, DeviceProfile, ResponseTiming};
use crate::core::protocol::checksum::ChecksumAlgorithm;
use crate::core::protocol::frame_spec::{ChecksumSpec, Coverage, FieldLayout, FrameSpec, LengthEncoding, Placement};
use crate::core::protocol::framing::Command;
use crate::core::protocol::status::StatusTable;

/// Synchronisation byte
pub const SYNC: u8 = 0xFF;
/// Frame size
pub const FRAME_SIZE: usize = 7;

/// Stop all motion
pub const STOP: u8 = 0x00;
/// Zoom in
pub const ZOOM_TELE: u8 = 0x20;
/// Zoom out
pub const ZOOM_WIDE: u8 = 0x40;
/// Query zoom position
pub const QUERY_ZOOM: u8 = 0x55;
/// Zoom position reply
pub const ZOOM_REPLY: u8 = 0xA7;
/// Focus position reply
pub const FOCUS_REPLY: u8 = 0x63;

fn spec(name: &str, header: Vec<u8>, status: Option<usize>) -> FrameSpec {
    FrameSpec {
        name: name.into(),
        header,
        layout: FieldLayout {
            function: Some(3),
            status,
            payload: 4,
        },
        length: LengthEncoding::Fixed { total: FRAME_SIZE },
        checksums: vec![ChecksumSpec {
            algorithm: ChecksumAlgorithm::Sum8,
            coverage: Coverage::Span { start: 1, end: 6 },
            placement: Placement::At(6),
        }],
        min_len: FRAME_SIZE,
        max_len: FRAME_SIZE,
    }
}

/// Device profile for camera `address`
#[must_use]
pub fn profile(address: u8) -> DeviceProfile {
    DeviceProfile {
        family: DeviceFamily::PelcoD,
        request: spec("pelco-d-request", vec![SYNC, address, 0x00], None),
        response: spec("pelco-d-reply", vec![SYNC, address], Some(2)),
        status: StatusTable::permissive(),
        timing: ResponseTiming::default().max_wait(Duration::from_millis(500)),
    }
}

/// Command with two data bytes
#[must_use]
pub fn command(cmd2: u8, data1: u8, data2: u8) -> Command {
    Command::new(cmd2, vec![data1, data2]).with_expected_len(FRAME_SIZE)
}

/// Zoom or focus position from a reply
#[must_use]
pub fn position(payload: &[u8]) -> Option<u16> {
    be_u16(payload, 0)
}

/// Horizontal field of view in degrees for a zoom position
#[must_use]
pub fn hfov_from_zoom(zoom: u16) -> f64 {
    const MAX_ZOOM: f64 = 16384.0;
    const WIDE_HFOV: f64 = 63.7;
    const TELE_HFOV: f64 = 2.3;
    let fraction = (f64::from(zoom) / MAX_ZOOM).min(1.0);
    WIDE_HFOV - (WIDE_HFOV - TELE_HFOV) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::framing::decode;

    #[test]
    fn test_zoom_reply() {
        let profile = profile(1);
        let frame = [0xFF, 0x01, 0x00, ZOOM_REPLY, 0x20, 0x00, 0xC8];
        let decoded = decode(&profile.response, &frame).unwrap();
        assert_eq!(decoded.function_code, Some(ZOOM_REPLY));
        assert_eq!(position(&decoded.payload), Some(0x2000));
    }

    #[test]
    fn test_hfov_bounds() {
        assert!((hfov_from_zoom(0) - 63.7).abs() < 1e-9);
        assert!((hfov_from_zoom(0x4000) - 2.3).abs() < 1e-9);
        assert!((hfov_from_zoom(0xFFFF) - 2.3).abs() < 1e-9);
    }
}
