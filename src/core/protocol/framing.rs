//! Frame encoding and validation
//!
//! [`encode`] builds a wire frame from a [`Command`] according to a
//! [`FrameSpec`]; [`decode`] validates a received buffer against the same
//! spec. [`FrameScanner`] wraps `decode` for byte streams that may start
//! mid-frame or carry several frames back to back.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use super::frame_spec::{ByteOrder, FrameSpec, LengthEncoding};

/// A command to send to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Protocol specific function identifier
    pub function: u8,
    /// Data bytes, may be empty
    pub payload: Bytes,
    /// Response length hint for fixed-length protocols
    pub expected_response_len: Option<usize>,
}

impl Command {
    /// Create a command with a payload
    pub fn new(function: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            function,
            payload: payload.into(),
            expected_response_len: None,
        }
    }

    /// Create a command without payload
    #[must_use]
    pub fn bare(function: u8) -> Self {
        Self::new(function, Bytes::new())
    }

    /// Set the expected response length
    #[must_use]
    pub fn with_expected_len(mut self, len: usize) -> Self {
        self.expected_response_len = Some(len);
        self
    }
}

/// Exact bytes of one frame, sent or received
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawFrame(Bytes);

impl RawFrame {
    /// Wrap received bytes
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Underlying bytes
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    /// Lowercase hex dump without separators
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::ops::Deref for RawFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for RawFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// A validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Raw status byte, 0 when the frame has no status field
    pub status_code: u8,
    /// Echoed function code, if the frame carries one
    pub function_code: Option<u8>,
    /// Data region
    pub payload: Bytes,
    /// Number of buffer bytes this frame occupies
    pub raw_len: usize,
}

/// Why a buffer did not decode
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Not enough bytes yet
    #[error("incomplete frame: need {needed} bytes, have {got}")]
    Incomplete {
        /// Bytes required
        needed: usize,
        /// Bytes available
        got: usize,
    },
    /// Header bytes or declared length are wrong
    #[error("malformed frame header")]
    MalformedHeader,
    /// A checksum did not match
    #[error("checksum {index} mismatch: computed {expected:#06x}, stored {actual:#06x}")]
    ChecksumMismatch {
        /// Index of the failing checksum in the spec
        index: usize,
        /// Value computed over the covered bytes
        expected: u16,
        /// Value stored in the frame
        actual: u16,
    },
}

/// Encode a command into a wire frame
///
/// Fixed-length frames are zero padded up to the payload capacity.
///
/// # Panics
///
/// Panics if the payload does not fit the spec, or if it contains the
/// terminator byte of a terminator-delimited spec. Both are caller bugs.
#[must_use]
pub fn encode(spec: &FrameSpec, command: &Command) -> RawFrame {
    build(spec, command, 0)
}

/// Encode a reply frame carrying `status` in the status field
///
/// Used to play the device side of an exchange. Specs without a status
/// field ignore `status`.
///
/// # Panics
///
/// Same conditions as [`encode`].
#[must_use]
pub fn encode_reply(spec: &FrameSpec, status: u8, command: &Command) -> RawFrame {
    build(spec, command, status)
}

fn build(spec: &FrameSpec, command: &Command, status: u8) -> RawFrame {
    let payload = &command.payload;
    let capacity = spec.payload_capacity();
    assert!(
        payload.len() <= capacity,
        "{}: payload of {} bytes exceeds capacity of {}",
        spec.name,
        payload.len(),
        capacity
    );

    let total = spec.encoded_len(payload.len());
    let mut frame = BytesMut::zeroed(total);
    frame[..spec.header.len()].copy_from_slice(&spec.header);

    if let Some(offset) = spec.layout.function {
        frame[offset] = command.function;
    }
    if let Some(offset) = spec.layout.status {
        frame[offset] = status;
    }

    match spec.length {
        LengthEncoding::Field { offset, width, order } => {
            write_length(&mut frame[offset..offset + width], payload.len(), order);
        }
        LengthEncoding::Terminator { byte } => {
            assert!(!payload.contains(&byte), "{}: payload contains terminator {byte:#04x}", spec.name);
            frame[total - 1] = byte;
        }
        LengthEncoding::Fixed { .. } | LengthEncoding::None => {}
    }

    let start = spec.layout.payload;
    frame[start..start + payload.len()].copy_from_slice(payload);

    // Declared order matters: later checksums may cover earlier ones
    for checksum in &spec.checksums {
        let (range, at) = checksum.resolve(total);
        let size = checksum.algorithm.size();
        let mut stored = [0u8; 2];
        checksum.algorithm.write(&frame[range], &mut stored[..size]);
        frame[at..at + size].copy_from_slice(&stored[..size]);
    }

    RawFrame(frame.freeze())
}

/// Validate `buffer` against `spec`
///
/// Only the first frame is inspected; bytes past its end are left to the
/// caller. The buffer is never modified.
///
/// # Errors
///
/// Returns the first [`ValidationFailure`] found.
pub fn decode(spec: &FrameSpec, buffer: &[u8]) -> Result<DecodedFrame, ValidationFailure> {
    if buffer.len() < spec.min_len {
        return Err(ValidationFailure::Incomplete {
            needed: spec.min_len,
            got: buffer.len(),
        });
    }
    if !buffer.starts_with(&spec.header) {
        return Err(ValidationFailure::MalformedHeader);
    }

    let total = frame_len(spec, buffer)?;
    let frame = &buffer[..total];

    for (index, checksum) in spec.checksums.iter().enumerate() {
        let (range, at) = checksum.resolve(total);
        let size = checksum.algorithm.size();
        let (Some(covered), Some(stored)) = (frame.get(range), frame.get(at..at + size)) else {
            return Err(ValidationFailure::MalformedHeader);
        };
        let expected = checksum.algorithm.compute(covered);
        let actual = checksum.algorithm.read(stored);
        if expected != actual {
            return Err(ValidationFailure::ChecksumMismatch { index, expected, actual });
        }
    }

    let field = |offset: Option<usize>| match offset {
        Some(offset) => frame.get(offset).copied().map(Some).ok_or(ValidationFailure::MalformedHeader),
        None => Ok(None),
    };
    let status_code = field(spec.layout.status)?.unwrap_or(0);
    let function_code = field(spec.layout.function)?;

    let start = spec.layout.payload;
    let end = spec.payload_end(total).max(start);
    let payload = frame.get(start..end).ok_or(ValidationFailure::MalformedHeader)?;

    Ok(DecodedFrame {
        status_code,
        function_code,
        payload: Bytes::copy_from_slice(payload),
        raw_len: total,
    })
}

fn frame_len(spec: &FrameSpec, buffer: &[u8]) -> Result<usize, ValidationFailure> {
    match spec.length {
        LengthEncoding::Fixed { total } => Ok(total),
        LengthEncoding::None => Ok(buffer.len().min(spec.max_len)),
        LengthEncoding::Field { offset, width, order } => {
            let declared = read_length(&buffer[offset..offset + width], order);
            let total = spec.layout.payload + declared + spec.trailer_len();
            if total > spec.max_len {
                return Err(ValidationFailure::MalformedHeader);
            }
            if buffer.len() < total {
                return Err(ValidationFailure::Incomplete {
                    needed: total,
                    got: buffer.len(),
                });
            }
            Ok(total)
        }
        LengthEncoding::Terminator { byte } => {
            let from = (spec.layout.payload + spec.trailer_len()).saturating_sub(1);
            let window = &buffer[..buffer.len().min(spec.max_len)];
            match window.iter().skip(from).position(|&b| b == byte) {
                Some(pos) => Ok(from + pos + 1),
                None if buffer.len() >= spec.max_len => Err(ValidationFailure::MalformedHeader),
                None => Err(ValidationFailure::Incomplete {
                    needed: buffer.len() + 1,
                    got: buffer.len(),
                }),
            }
        }
    }
}

fn write_length(out: &mut [u8], len: usize, order: ByteOrder) {
    // Capacity was checked against the field width by the caller
    let value = u16::try_from(len).unwrap_or(u16::MAX);
    match (out.len(), order) {
        (1, _) => out[0] = value.to_be_bytes()[1],
        (_, ByteOrder::Big) => out.copy_from_slice(&value.to_be_bytes()),
        (_, ByteOrder::Little) => out.copy_from_slice(&value.to_le_bytes()),
    }
}

fn read_length(bytes: &[u8], order: ByteOrder) -> usize {
    match (bytes.len(), order) {
        (1, _) => usize::from(bytes[0]),
        (_, ByteOrder::Big) => usize::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        (_, ByteOrder::Little) => usize::from(u16::from_le_bytes([bytes[0], bytes[1]])),
    }
}

/// Offset of the first byte that could start a frame
///
/// A header prefix at the end of the buffer counts, since the rest may
/// still arrive.
fn header_start(header: &[u8], buffer: &[u8]) -> usize {
    (0..buffer.len())
        .find(|&i| {
            let tail = &buffer[i..];
            let n = tail.len().min(header.len());
            tail[..n] == header[..n]
        })
        .unwrap_or(buffer.len())
}

/// Streaming frame extractor
///
/// Accumulates bytes, drops anything in front of a header, and yields frames
/// as they complete. Bytes after a frame stay buffered for the next one.
pub struct FrameScanner {
    spec: FrameSpec,
    buffer: BytesMut,
    dropped: usize,
}

impl FrameScanner {
    /// Create new scanner
    #[must_use]
    pub fn new(spec: FrameSpec) -> Self {
        Self {
            spec,
            buffer: BytesMut::new(),
            dropped: 0,
        }
    }

    /// Add data and return every frame it completes
    ///
    /// Frames that fail validation are reported and skipped.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<DecodedFrame, ValidationFailure>> {
        self.buffer.extend_from_slice(data);
        let frames = std::iter::from_fn(|| self.next_frame()).collect();

        let limit = self.spec.max_len * 4;
        if self.buffer.len() > limit {
            let excess = self.buffer.len() - limit;
            tracing::warn!(spec = %self.spec.name, excess, "scanner backlog full");
            self.dropped += excess;
            self.buffer.advance(excess);
        }
        frames
    }

    /// Extract the next frame, if one is complete
    pub fn next_frame(&mut self) -> Option<Result<DecodedFrame, ValidationFailure>> {
        let skip = header_start(&self.spec.header, &self.buffer);
        if skip > 0 {
            tracing::trace!(spec = %self.spec.name, skip, "resync: dropping bytes before header");
            self.dropped += skip;
            self.buffer.advance(skip);
        }
        if self.buffer.is_empty() {
            return None;
        }

        match decode(&self.spec, &self.buffer) {
            Ok(frame) => {
                self.buffer.advance(frame.raw_len);
                Some(Ok(frame))
            }
            Err(ValidationFailure::Incomplete { .. }) => None,
            Err(failure) => {
                tracing::warn!(spec = %self.spec.name, %failure, "discarding invalid frame");
                self.dropped += 1;
                self.buffer.advance(1);
                Some(Err(failure))
            }
        }
    }

    /// Bytes waiting for more data
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes discarded while resynchronising
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Clear buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::devices::{lrf, pelco_d, tau2, visca};
    use crate::core::protocol::frame_spec::Coverage;

    fn tau2_spec() -> FrameSpec {
        tau2::profile().request
    }

    #[test]
    fn test_tau2_reference_frame() {
        let frame = encode(&tau2_spec(), &Command::new(0x06, vec![0x00, 0x00]));
        assert_eq!(
            &frame[..],
            &[0x6E, 0x00, 0x00, 0x06, 0x00, 0x02, 0x4D, 0x59, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(frame.to_string(), "6E 00 00 06 00 02 4D 59 00 00 00 00");
    }

    #[test]
    fn test_tau2_roundtrip() {
        let spec = tau2_spec();
        for payload in [vec![], vec![0x01, 0x2C], vec![0xAA; 37]] {
            let command = Command::new(0x20, payload.clone());
            let frame = encode(&spec, &command);
            let decoded = decode(&spec, &frame).unwrap();
            assert_eq!(decoded.function_code, Some(0x20));
            assert_eq!(&decoded.payload[..], &payload[..]);
            assert_eq!(decoded.status_code, 0);
            assert_eq!(decoded.raw_len, frame.len());
        }
    }

    #[test]
    fn test_lrf_self_check_checksum() {
        let frame = encode(&lrf::profile().request, &Command::bare(lrf::SELF_CHECK));
        assert_eq!(&frame[..], &[0xEE, 0x07, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_lrf_roundtrip_with_full_parameters() {
        let spec = lrf::profile().request;
        let command = Command::new(0x02, vec![0x10, 0x20, 0x30, 0x40, 0x50]);
        let frame = encode(&spec, &command);
        assert_eq!(frame[8], 0x02 + 0x10 + 0x20 + 0x30 + 0x40 + 0x50);
        let decoded = decode(&spec, &frame).unwrap();
        assert_eq!(decoded.function_code, Some(0x02));
        assert_eq!(decoded.payload, command.payload);
    }

    #[test]
    fn test_visca_and_pelco_roundtrip() {
        let spec = visca::profile(1).request;
        let frame = encode(&spec, &Command::new(0x01, vec![0x04, 0x00, 0x02]));
        assert_eq!(&frame[..], &[0x81, 0x01, 0x04, 0x00, 0x02, 0xFF]);
        let decoded = decode(&spec, &frame).unwrap();
        assert_eq!(decoded.function_code, Some(0x01));
        assert_eq!(&decoded.payload[..], &[0x04, 0x00, 0x02]);

        let spec = pelco_d::profile(1).request;
        let frame = encode(&spec, &Command::new(0x20, vec![0x00, 0x00]));
        assert_eq!(&frame[..], &[0xFF, 0x01, 0x00, 0x20, 0x00, 0x00, 0x21]);
        assert_eq!(decode(&spec, &frame).unwrap().function_code, Some(0x20));
    }

    #[test]
    fn test_single_byte_flip_reports_checksum_index() {
        let spec = tau2_spec();
        let frame = encode(&spec, &Command::new(0x20, vec![0x01, 0x2C, 0x7F]));

        // Status, reserved and function bytes are covered by the header CRC
        for i in 1..4 {
            let mut corrupt = frame.to_vec();
            corrupt[i] ^= 0x01;
            assert!(matches!(
                decode(&spec, &corrupt),
                Err(ValidationFailure::ChecksumMismatch { index: 0, .. })
            ));
        }
        // Payload bytes are covered only by the trailing CRC
        for i in 8..11 {
            let mut corrupt = frame.to_vec();
            corrupt[i] ^= 0x80;
            assert!(matches!(
                decode(&spec, &corrupt),
                Err(ValidationFailure::ChecksumMismatch { index: 1, .. })
            ));
        }

        let spec = lrf::profile().request;
        let frame = encode(&spec, &Command::new(0x02, vec![0x00, 0x01]));
        for i in 2..8 {
            let mut corrupt = frame.to_vec();
            corrupt[i] = corrupt[i].wrapping_add(1);
            assert!(matches!(
                decode(&spec, &corrupt),
                Err(ValidationFailure::ChecksumMismatch { index: 0, .. })
            ));
        }
    }

    #[test]
    fn test_short_buffers_are_incomplete() {
        let spec = tau2_spec();
        let frame = encode(&spec, &Command::new(0x20, vec![0x01, 0x2C]));
        for len in 0..frame.len() {
            assert!(matches!(
                decode(&spec, &frame[..len]),
                Err(ValidationFailure::Incomplete { .. })
            ));
        }

        let spec = lrf::profile().request;
        assert_eq!(
            decode(&spec, &[0xEE, 0x07, 0x01]),
            Err(ValidationFailure::Incomplete { needed: 9, got: 3 })
        );
    }

    #[test]
    fn test_malformed_header() {
        let spec = lrf::profile().request;
        let mut frame = encode(&spec, &Command::bare(0x01)).to_vec();
        frame[1] = 0x08;
        assert_eq!(decode(&spec, &frame), Err(ValidationFailure::MalformedHeader));
    }

    #[test]
    fn test_unvalidated_spec_never_panics() {
        let mut spec = lrf::profile().request;
        let frame = encode(&spec, &Command::bare(0x01)).to_vec();
        spec.checksums[0].coverage = Coverage::Span { start: 6, end: 2 };
        assert_eq!(decode(&spec, &frame), Err(ValidationFailure::MalformedHeader));

        let mut spec = visca::response_spec(1);
        spec.layout.status = Some(4);
        assert_eq!(decode(&spec, &[0x90, 0x41, 0xFF]), Err(ValidationFailure::MalformedHeader));
    }

    #[test]
    fn test_oversized_declared_length_is_malformed() {
        let spec = tau2_spec();
        let mut frame = encode(&spec, &Command::bare(0x20)).to_vec();
        frame[4] = 0xFF;
        assert_eq!(decode(&spec, &frame), Err(ValidationFailure::MalformedHeader));
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let spec = tau2_spec();
        let first = encode(&spec, &Command::new(0x20, vec![0x01, 0x2C]));
        let mut buffer = first.to_vec();
        buffer.extend_from_slice(&[0x6E, 0x00]);
        let decoded = decode(&spec, &buffer).unwrap();
        assert_eq!(decoded.raw_len, first.len());
        assert_eq!(&buffer[decoded.raw_len..], &[0x6E, 0x00]);
    }

    #[test]
    fn test_scanner_resyncs_and_splits_chunks() {
        let spec = lrf::profile().request;
        let frame = encode(&spec, &Command::new(0x02, vec![0x00, 0x00, 0x01, 0xF4]));
        let mut scanner = FrameScanner::new(spec);

        let mut stream = vec![0x00, 0xEE, 0x13];
        stream.extend_from_slice(&frame[..4]);
        assert!(scanner.push(&stream).is_empty());

        let mut rest = frame[4..].to_vec();
        rest.extend_from_slice(&frame[..2]);
        let frames = scanner.push(&rest);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().function_code, Some(0x02));
        assert_eq!(scanner.buffered(), &frame[..2]);
        assert_eq!(scanner.dropped(), 3);
    }

    #[test]
    fn test_scanner_skips_corrupt_frame() {
        let spec = tau2_spec();
        let good = encode(&spec, &Command::new(0x20, vec![0x01, 0x2C]));
        let mut bad = good.to_vec();
        bad[9] ^= 0xFF;

        let mut scanner = FrameScanner::new(spec);
        let mut stream = bad;
        stream.extend_from_slice(&good);
        let frames = scanner.push(&stream);

        assert!(matches!(
            frames.first(),
            Some(Err(ValidationFailure::ChecksumMismatch { index: 1, .. }))
        ));
        let decoded: Vec<_> = frames.into_iter().filter_map(Result::ok).collect();
        assert_eq!(decoded.len(), 1);
        assert_eq!(&decoded[0].payload[..], &[0x01, 0x2C]);
        assert!(scanner.buffered().is_empty());
    }

    #[test]
    #[should_panic(expected = "exceeds capacity")]
    fn test_oversized_payload_panics() {
        let _ = encode(&lrf::profile().request, &Command::new(0x02, vec![0; 6]));
    }

    #[test]
    fn test_reply_carries_status() {
        let spec = tau2::frame_spec();
        let reply = encode_reply(&spec, 0x01, &Command::bare(tau2::DO_FFC));
        assert_eq!(reply[1], 0x01);

        let decoded = decode(&spec, &reply).unwrap();
        assert_eq!(decoded.status_code, 0x01);
        assert_eq!(decoded.function_code, Some(tau2::DO_FFC));
    }
}
