//! Checksum algorithms used by device frames
//!
//! Supports: 8-bit additive sum, CRC-16/CCITT (polynomial 0x1021, init 0x0000)

use serde::{Deserialize, Serialize};

/// Checksum algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    /// Sum of all covered bytes, truncated to the low byte
    Sum8,
    /// CRC-16/CCITT with a zero initial value (a.k.a. XMODEM), big-endian on the wire
    Crc16Ccitt,
}

impl ChecksumAlgorithm {
    /// Get all available algorithms
    #[must_use]
    pub fn all() -> &'static [ChecksumAlgorithm] {
        &[ChecksumAlgorithm::Sum8, ChecksumAlgorithm::Crc16Ccitt]
    }

    /// Get name of algorithm
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sum8 => "Sum-8",
            ChecksumAlgorithm::Crc16Ccitt => "CRC-16/CCITT",
        }
    }

    /// Get output size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sum8 => 1,
            ChecksumAlgorithm::Crc16Ccitt => 2,
        }
    }

    /// Compute the checksum as an integer
    #[must_use]
    pub fn compute(&self, data: &[u8]) -> u16 {
        match self {
            ChecksumAlgorithm::Sum8 => u16::from(sum8(data)),
            ChecksumAlgorithm::Crc16Ccitt => crc16_ccitt(data),
        }
    }

    /// Write the checksum of `data` into `out` (big-endian, `out.len() == self.size()`)
    pub fn write(&self, data: &[u8], out: &mut [u8]) {
        let value = self.compute(data);
        match self {
            ChecksumAlgorithm::Sum8 => out[0] = value.to_be_bytes()[1],
            ChecksumAlgorithm::Crc16Ccitt => out.copy_from_slice(&value.to_be_bytes()),
        }
    }

    /// Read a stored checksum back from its wire bytes
    #[must_use]
    pub fn read(&self, bytes: &[u8]) -> u16 {
        match self {
            ChecksumAlgorithm::Sum8 => u16::from(bytes[0]),
            ChecksumAlgorithm::Crc16Ccitt => u16::from_be_bytes([bytes[0], bytes[1]]),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Verify a stored checksum against `data`
#[must_use]
pub fn verify(data: &[u8], stored: &[u8], algorithm: ChecksumAlgorithm) -> bool {
    stored.len() == algorithm.size() && algorithm.read(stored) == algorithm.compute(data)
}

// ============ Individual checksum implementations ============

/// Simple 8-bit sum
#[must_use]
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/CCITT, zero initial value
/// Polynomial: 0x1021, Init: 0x0000, RefIn: false, RefOut: false
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;

    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
