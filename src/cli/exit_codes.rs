//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use std::process::ExitCode;

use crate::config::ConfigError;
use crate::core::dispatch::DispatchError;
use crate::core::protocol::DeviceStatus;
use crate::core::transport::TransportError;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// No reply in time
    pub const TIMEOUT: u8 = 4;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 5;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 6;

    /// Reply was truncated or malformed
    pub const PROTOCOL_ERROR: u8 = 7;

    /// Reply checksum failed
    pub const VALIDATION_FAILED: u8 = 8;

    /// Device reported a failure
    pub const DEVICE_ERROR: u8 = 9;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Device name not configured
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 13;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Every defined code
    pub const ALL: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 127];
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Failure with a code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Exit code for a transport failure
pub fn transport_exit_code(err: &TransportError) -> u8 {
    match err {
        TransportError::Timeout(_) | TransportError::WriteTimeout { .. } => ExitCodes::TIMEOUT,
        TransportError::Incomplete { .. } | TransportError::MalformedHeader => ExitCodes::PROTOCOL_ERROR,
        TransportError::ChecksumMismatch(_) => ExitCodes::VALIDATION_FAILED,
        TransportError::Cancelled => ExitCodes::CANCELLED,
        TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
        TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
        TransportError::ConnectionFailed(_) | TransportError::Disconnected => ExitCodes::CONNECTION_FAILED,
        TransportError::IoError(_) => ExitCodes::ERROR,
    }
}

impl From<&DispatchError> for CliResult {
    fn from(err: &DispatchError) -> Self {
        let code = match err {
            DispatchError::Device(DeviceStatus::Busy) => ExitCodes::DEVICE_BUSY,
            DispatchError::Device(_) => ExitCodes::DEVICE_ERROR,
            DispatchError::Transport(e) => transport_exit_code(e),
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        Self::Error(transport_exit_code(err), err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        let code = match err {
            ConfigError::UnknownDevice(_) => ExitCodes::DEVICE_NOT_FOUND,
            _ => ExitCodes::CONFIG_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

/// Exit code for an error surfaced through `anyhow`
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<DispatchError>() {
        CliResult::from(e).code()
    } else if let Some(e) = err.downcast_ref::<TransportError>() {
        transport_exit_code(e)
    } else if let Some(e) = err.downcast_ref::<ConfigError>() {
        CliResult::from(e).code()
    } else {
        ExitCodes::ERROR
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "No response (timeout)",
        5 => "Permission denied",
        6 => "Configuration error",
        7 => "Protocol error",
        8 => "Checksum validation failed",
        9 => "Device reported an error",
        10 => "Device busy",
        11 => "Operation cancelled",
        12 => "Device not configured",
        13 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_dispatch_error_codes() {
        let busy = DispatchError::Device(DeviceStatus::Busy);
        assert_eq!(CliResult::from(&busy).code(), ExitCodes::DEVICE_BUSY);

        let range = DispatchError::Device(DeviceStatus::DataOutOfRange);
        assert_eq!(CliResult::from(&range).code(), ExitCodes::DEVICE_ERROR);

        let timeout = DispatchError::Transport(TransportError::Timeout(Duration::from_secs(1)));
        assert_eq!(CliResult::from(&timeout).code(), ExitCodes::TIMEOUT);

        let crc = DispatchError::Transport(TransportError::ChecksumMismatch(0));
        assert_eq!(CliResult::from(&crc).code(), ExitCodes::VALIDATION_FAILED);
    }

    #[test]
    fn test_anyhow_downcast() {
        let err = anyhow::Error::new(ConfigError::UnknownDevice("x".into()));
        assert_eq!(exit_code_for(&err), ExitCodes::DEVICE_NOT_FOUND);

        let err = anyhow::Error::new(DispatchError::Transport(TransportError::Cancelled));
        assert_eq!(exit_code_for(&err), ExitCodes::CANCELLED);

        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), ExitCodes::ERROR);
    }

    #[test]
    fn test_every_code_is_described() {
        for code in ExitCodes::ALL {
            assert_ne!(exit_code_description(code), "Unknown error");
        }
    }
}
