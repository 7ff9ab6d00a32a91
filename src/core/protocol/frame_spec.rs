//! Declarative frame layouts
//!
//! A [`FrameSpec`] describes where the header, function code, status byte,
//! length field, payload and checksums of one device's frames live. The
//! codec in [`super::framing`] interprets it; device families only supply data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::checksum::ChecksumAlgorithm;

/// Byte order of multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Most significant byte first
    #[default]
    Big,
    /// Least significant byte first
    Little,
}

/// How the total frame length is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LengthEncoding {
    /// The frame is whatever was received, up to `max_len`
    None,
    /// Every frame has exactly this many bytes
    Fixed {
        /// Total frame length
        total: usize,
    },
    /// A field declares the payload length
    Field {
        /// Offset of the length field
        offset: usize,
        /// Width of the length field in bytes (1 or 2)
        width: usize,
        /// Byte order of the length field
        #[serde(default)]
        order: ByteOrder,
    },
    /// The frame ends at the first occurrence of this byte after the payload start
    Terminator {
        /// Terminating byte
        byte: u8,
    },
}

/// Where a checksum is stored in the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Absolute offset from the frame start
    At(usize),
    /// This many bytes before the frame end
    FromEnd(usize),
}

/// Bytes a checksum is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Coverage {
    /// Fixed `[start, end)` range
    Span {
        /// First covered byte
        start: usize,
        /// One past the last covered byte
        end: usize,
    },
    /// From `start` up to the checksum's own placement
    UpToPlacement {
        /// First covered byte
        start: usize,
    },
}

/// One checksum field of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSpec {
    /// Algorithm
    pub algorithm: ChecksumAlgorithm,
    /// Covered bytes
    pub coverage: Coverage,
    /// Location of the stored checksum
    pub placement: Placement,
}

impl ChecksumSpec {
    /// Resolve the covered range and placement offset for a frame of `total` bytes
    #[must_use]
    pub fn resolve(&self, total: usize) -> (std::ops::Range<usize>, usize) {
        let at = match self.placement {
            Placement::At(offset) => offset,
            Placement::FromEnd(back) => total.saturating_sub(back),
        };
        let range = match self.coverage {
            Coverage::Span { start, end } => start..end,
            Coverage::UpToPlacement { start } => start..at,
        };
        (range, at)
    }
}

/// Field offsets inside the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    /// Offset of the function code, if the frame carries one
    pub function: Option<usize>,
    /// Offset of the status byte, if the frame carries one
    pub status: Option<usize>,
    /// Offset where the payload begins
    pub payload: usize,
}

/// Invalid frame description
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    /// No header bytes
    #[error("frame spec '{0}' has an empty header")]
    EmptyHeader(String),
    /// Length bounds are inconsistent
    #[error("frame spec '{name}': invalid length bounds min={min} max={max}")]
    LengthBounds {
        /// Spec name
        name: String,
        /// Minimum length
        min: usize,
        /// Maximum length
        max: usize,
    },
    /// A field overlaps the payload region or lies outside the frame
    #[error("frame spec '{name}': {field} at offset {offset} is outside the frame prefix")]
    FieldOutOfPlace {
        /// Spec name
        name: String,
        /// Field name
        field: &'static str,
        /// Offending offset
        offset: usize,
    },
    /// A checksum covers its own bytes
    #[error("frame spec '{name}': checksum {index} covers its own placement")]
    SelfCoveringChecksum {
        /// Spec name
        name: String,
        /// Checksum index
        index: usize,
    },
    /// Length rule cannot produce a frame of the minimum length
    #[error("frame spec '{name}': length rule inconsistent with minimum length {min}")]
    LengthFieldMismatch {
        /// Spec name
        name: String,
        /// Minimum length
        min: usize,
    },
}

/// Declarative description of a device's frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSpec {
    /// Human readable name
    pub name: String,
    /// Fixed leading bytes
    pub header: Vec<u8>,
    /// Field offsets
    pub layout: FieldLayout,
    /// Length rule
    pub length: LengthEncoding,
    /// Checksums, computed in declared order
    #[serde(default)]
    pub checksums: Vec<ChecksumSpec>,
    /// Shortest valid frame
    pub min_len: usize,
    /// Longest valid frame
    pub max_len: usize,
}

impl FrameSpec {
    /// Number of bytes after the payload: trailing checksums and terminator
    #[must_use]
    pub fn trailer_len(&self) -> usize {
        let checksums = self
            .checksums
            .iter()
            .filter_map(|c| match c.placement {
                Placement::FromEnd(back) => Some(back),
                Placement::At(_) => None,
            })
            .max()
            .unwrap_or(0);
        let terminator = usize::from(matches!(self.length, LengthEncoding::Terminator { .. }));
        checksums.max(terminator)
    }

    /// End of the payload region for a frame of `total` bytes
    #[must_use]
    pub fn payload_end(&self, total: usize) -> usize {
        let start = self.layout.payload;
        self.checksums
            .iter()
            .filter_map(|c| match c.placement {
                Placement::At(offset) if offset >= start => Some(offset),
                _ => None,
            })
            .chain(std::iter::once(total.saturating_sub(self.trailer_len())))
            .min()
            .unwrap_or(total)
    }

    /// Largest payload an encoded frame can carry
    #[must_use]
    pub fn payload_capacity(&self) -> usize {
        let by_frame = self.payload_end(self.max_len).saturating_sub(self.layout.payload);
        match self.length {
            LengthEncoding::Field { width: 1, .. } => by_frame.min(usize::from(u8::MAX)),
            LengthEncoding::Field { .. } => by_frame.min(usize::from(u16::MAX)),
            _ => by_frame,
        }
    }

    /// Total length of an encoded frame carrying `payload_len` bytes
    #[must_use]
    pub fn encoded_len(&self, payload_len: usize) -> usize {
        match self.length {
            LengthEncoding::Fixed { total } => total,
            _ => self.layout.payload + payload_len + self.trailer_len(),
        }
    }

    /// Check the structural invariants of this description
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), SpecError> {
        let name = || self.name.clone();

        if self.header.is_empty() {
            return Err(SpecError::EmptyHeader(name()));
        }
        if self.min_len < self.header.len() || self.min_len > self.max_len {
            return Err(SpecError::LengthBounds { name: name(), min: self.min_len, max: self.max_len });
        }

        let payload = self.layout.payload;
        if payload < self.header.len() || payload > self.min_len {
            return Err(SpecError::FieldOutOfPlace { name: name(), field: "payload", offset: payload });
        }
        if let Some(offset) = self.layout.function {
            if offset >= payload {
                return Err(SpecError::FieldOutOfPlace { name: name(), field: "function code", offset });
            }
        }
        if let Some(offset) = self.layout.status {
            if offset >= self.min_len {
                return Err(SpecError::FieldOutOfPlace { name: name(), field: "status", offset });
            }
        }

        match self.length {
            LengthEncoding::Fixed { total } => {
                if total != self.min_len || total != self.max_len {
                    return Err(SpecError::LengthBounds { name: name(), min: self.min_len, max: self.max_len });
                }
            }
            LengthEncoding::Field { offset, width, .. } => {
                if !(1..=2).contains(&width) || offset + width > payload {
                    return Err(SpecError::FieldOutOfPlace { name: name(), field: "length", offset });
                }
                if self.min_len != payload + self.trailer_len() {
                    return Err(SpecError::LengthFieldMismatch { name: name(), min: self.min_len });
                }
            }
            LengthEncoding::Terminator { .. } => {
                // The shortest terminated frame must still hold every field
                if self.min_len != payload + self.trailer_len() {
                    return Err(SpecError::LengthFieldMismatch { name: name(), min: self.min_len });
                }
            }
            LengthEncoding::None => {}
        }

        for (index, checksum) in self.checksums.iter().enumerate() {
            if let Coverage::Span { start, end } = checksum.coverage {
                if start > end {
                    return Err(SpecError::FieldOutOfPlace { name: name(), field: "checksum coverage", offset: start });
                }
            }
            let (range, at) = checksum.resolve(self.min_len);
            let end = at + checksum.algorithm.size();
            if end > self.min_len || range.end > self.min_len {
                return Err(SpecError::FieldOutOfPlace { name: name(), field: "checksum", offset: at });
            }
            if range.start < end && at < range.end {
                return Err(SpecError::SelfCoveringChecksum { name: name(), index });
            }
        }

        Ok(())
    }
}
