//! Wire-level reference frames

use hwprobe_core::core::protocol::checksum::crc16_ccitt;
use hwprobe_core::core::protocol::devices::{lrf, pelco_d, tau2};
use hwprobe_core::core::protocol::FrameScanner;
use hwprobe_core::{decode, encode, Command, ValidationFailure};

#[test]
fn test_crc_check_value() {
    assert_eq!(crc16_ccitt(b"123456789"), 0x31C3);
}

#[test]
fn test_tau2_frames() {
    let spec = tau2::frame_spec();

    let status = encode(&spec, &Command::new(tau2::STATUS_REQUEST, vec![0x00, 0x00]));
    assert_eq!(status.to_string(), "6E 00 00 06 00 02 4D 59 00 00 00 00");

    let temperature = encode(&spec, &Command::new(tau2::READ_TEMP_SENSOR, vec![0x01, 0x2C]));
    assert_eq!(temperature.to_hex(), "6e0000200002793f012cd6df");

    let decoded = decode(&spec, &temperature).unwrap();
    assert_eq!(tau2::fpa_temperature(&decoded.payload), Some(30.0));
}

#[test]
fn test_pelco_zoom_reply() {
    let reply = [0xFF, 0x01, 0x00, 0xA7, 0x20, 0x00, 0xC8];
    let decoded = decode(&pelco_d::profile(1).response, &reply).unwrap();
    assert_eq!(pelco_d::position(&decoded.payload), Some(0x2000));
}

#[test]
fn test_corruption_is_detected_anywhere_in_the_body() {
    let spec = lrf::frame_spec();
    let frame = encode(&spec, &lrf::command(lrf::SINGLE_RANGING));

    // Everything after the header is summed or is the sum itself
    for i in spec.header.len()..frame.len() {
        let mut bad = frame.to_vec();
        bad[i] ^= 0x01;
        assert!(
            matches!(decode(&spec, &bad), Err(ValidationFailure::ChecksumMismatch { index: 0, .. })),
            "flip at {i} went unnoticed"
        );
    }

    let mut bad = frame.to_vec();
    bad[0] ^= 0x01;
    assert_eq!(decode(&spec, &bad), Err(ValidationFailure::MalformedHeader));
}

#[test]
fn test_scanner_over_noisy_stream() {
    let spec = tau2::frame_spec();
    let temperature = encode(&spec, &tau2::read_temperature());
    let status = encode(&spec, &tau2::status_request());

    let mut stream = vec![0x13, 0x37];
    stream.extend_from_slice(&temperature);
    stream.extend_from_slice(&[0xAA; 4]);
    stream.extend_from_slice(&status);

    let mut scanner = FrameScanner::new(spec);
    let mut functions = Vec::new();
    for chunk in stream.chunks(5) {
        functions.extend(scanner.push(chunk).into_iter().filter_map(Result::ok).map(|f| f.function_code));
    }

    assert_eq!(functions, vec![Some(tau2::READ_TEMP_SENSOR), Some(tau2::STATUS_REQUEST)]);
    assert_eq!(scanner.dropped(), 6);
    assert!(scanner.buffered().is_empty());
}
