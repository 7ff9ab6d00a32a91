//! Device status classification
//!
//! Every device family reports failures with its own numeric codes. A
//! [`StatusTable`] maps those codes onto the shared [`DeviceStatus`]
//! categories. Classification is total: unknown codes become
//! [`DeviceStatus::Unknown`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared meaning of a device-reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceStatus {
    /// Device is busy processing another command
    #[error("camera busy processing command")]
    Busy,
    /// Device has not finished starting up
    #[error("camera not ready")]
    NotReady,
    /// Argument out of the accepted range
    #[error("data out of range")]
    DataOutOfRange,
    /// Device rejected the frame checksum
    #[error("header or message-body checksum error")]
    ChecksumError,
    /// Unknown process code
    #[error("unknown process code")]
    UndefinedProcessCode,
    /// Unknown function code
    #[error("unknown function code")]
    UndefinedFunctionCode,
    /// Device timed out executing the command
    #[error("timeout executing serial command")]
    CommandTimeout,
    /// Declared byte count did not match
    #[error("byte count incorrect for function code")]
    ByteCountMismatch,
    /// Feature not enabled on this device
    #[error("feature not enabled")]
    FeatureNotEnabled,
    /// Code not in the device's table
    #[error("unknown status code {0:#04x}")]
    Unknown(u8),
}

impl DeviceStatus {
    /// Short identifier for logs and machine output
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DeviceStatus::Busy => "busy",
            DeviceStatus::NotReady => "not-ready",
            DeviceStatus::DataOutOfRange => "data-out-of-range",
            DeviceStatus::ChecksumError => "checksum-error",
            DeviceStatus::UndefinedProcessCode => "undefined-process-code",
            DeviceStatus::UndefinedFunctionCode => "undefined-function-code",
            DeviceStatus::CommandTimeout => "command-timeout",
            DeviceStatus::ByteCountMismatch => "byte-count-mismatch",
            DeviceStatus::FeatureNotEnabled => "feature-not-enabled",
            DeviceStatus::Unknown(_) => "unknown",
        }
    }
}

/// Result of classifying a status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Device accepted the command
    Success,
    /// Device reported a failure
    Failure(DeviceStatus),
}

/// Per-family status code table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusTable {
    /// Codes meaning success; empty means every code succeeds
    pub success: Vec<u8>,
    /// Known failure codes
    #[serde(default)]
    pub failures: Vec<(u8, DeviceStatus)>,
    /// Mask applied to the raw byte before lookup
    #[serde(default = "full_mask")]
    pub mask: u8,
    /// Masked status meaning "the first payload byte names the error"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_marker: Option<u8>,
    /// Error codes carried after `detail_marker`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<(u8, DeviceStatus)>,
}

fn full_mask() -> u8 {
    0xFF
}

impl StatusTable {
    /// Table for frames without a meaningful status byte
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            success: Vec::new(),
            failures: Vec::new(),
            mask: 0xFF,
            detail_marker: None,
            details: Vec::new(),
        }
    }

    /// Table with the given success codes and failure entries
    #[must_use]
    pub fn new(success: &[u8], failures: &[(u8, DeviceStatus)]) -> Self {
        Self {
            success: success.to_vec(),
            failures: failures.to_vec(),
            mask: 0xFF,
            detail_marker: None,
            details: Vec::new(),
        }
    }

    /// Mask the raw byte before lookup
    #[must_use]
    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    /// Read the error code from the first payload byte when the masked
    /// status equals `marker`
    #[must_use]
    pub fn with_details(mut self, marker: u8, details: &[(u8, DeviceStatus)]) -> Self {
        self.detail_marker = Some(marker);
        self.details = details.to_vec();
        self
    }

    /// Classify a reply from its status byte and, for tables with a detail
    /// marker, the byte that follows it
    ///
    /// Codes missing from the tables become [`DeviceStatus::Unknown`] with
    /// the raw status byte.
    #[must_use]
    pub fn classify_reply(&self, raw: u8, detail: Option<u8>) -> StatusClass {
        let code = raw & self.mask;
        if self.detail_marker == Some(code) {
            let status = detail
                .and_then(|d| self.details.iter().find(|(known, _)| *known == d))
                .map_or(DeviceStatus::Unknown(raw), |(_, status)| *status);
            return StatusClass::Failure(status);
        }
        self.classify(raw)
    }

    /// Classify a raw status byte
    #[must_use]
    pub fn classify(&self, raw: u8) -> StatusClass {
        let code = raw & self.mask;
        if self.success.is_empty() || self.success.contains(&code) {
            return StatusClass::Success;
        }
        let status = self
            .failures
            .iter()
            .find(|(known, _)| *known == code)
            .map_or(DeviceStatus::Unknown(raw), |(_, status)| *status);
        StatusClass::Failure(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::devices::{lrf, pelco_d, tau2, visca};

    #[test]
    fn test_tau2_codes() {
        let table = tau2::profile().status;
        assert_eq!(table.classify(0x00), StatusClass::Success);
        assert_eq!(table.classify(0x01), StatusClass::Failure(DeviceStatus::Busy));
        assert_eq!(table.classify(0x04), StatusClass::Failure(DeviceStatus::ChecksumError));
        assert_eq!(table.classify(0x09), StatusClass::Failure(DeviceStatus::ByteCountMismatch));
        assert_eq!(table.classify(0x0A), StatusClass::Failure(DeviceStatus::FeatureNotEnabled));
        assert_eq!(table.classify(0x08), StatusClass::Failure(DeviceStatus::Unknown(0x08)));
    }

    #[test]
    fn test_visca_masks_address_nibble() {
        let table = visca::profile(1).status;
        assert_eq!(table.classify(0x41), StatusClass::Success);
        assert_eq!(table.classify(0x51), StatusClass::Success);
        assert_eq!(table.classify(0x60), StatusClass::Failure(DeviceStatus::Unknown(0x60)));
    }

    #[test]
    fn test_visca_error_codes() {
        let table = visca::profile(1).status;
        let error = |code| table.classify_reply(0x61, Some(code));
        assert_eq!(error(0x01), StatusClass::Failure(DeviceStatus::ByteCountMismatch));
        assert_eq!(error(0x02), StatusClass::Failure(DeviceStatus::UndefinedFunctionCode));
        assert_eq!(error(0x03), StatusClass::Failure(DeviceStatus::Busy));
        assert_eq!(error(0x41), StatusClass::Failure(DeviceStatus::NotReady));
        assert_eq!(error(0x7F), StatusClass::Failure(DeviceStatus::Unknown(0x61)));
        assert_eq!(table.classify_reply(0x60, None), StatusClass::Failure(DeviceStatus::Unknown(0x60)));
        assert_eq!(table.classify_reply(0x51, Some(0x02)), StatusClass::Success);
    }

    #[test]
    fn test_classification_is_total() {
        for table in [
            tau2::profile().status,
            lrf::profile().status,
            visca::profile(1).status,
            pelco_d::profile(1).status,
        ] {
            for raw in 0..=u8::MAX {
                match table.classify_reply(raw, Some(0xEE)) {
                    StatusClass::Success => {}
                    StatusClass::Failure(DeviceStatus::Unknown(code)) => assert_eq!(code, raw),
                    StatusClass::Failure(status) => assert_ne!(status.name(), "unknown"),
                }
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(DeviceStatus::Busy.to_string(), "camera busy processing command");
        assert_eq!(DeviceStatus::Unknown(0x3F).to_string(), "unknown status code 0x3f");
    }
}
