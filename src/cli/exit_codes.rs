//! CLI Exit Codes
//!
//! Exit codes returned by the `scanlink` binary.

use crate::config::ConfigError;
use crate::core::error::ScannerError;
use crate::core::registry::RegistryError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

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

    /// Port could not be opened
    pub const CONNECTION_FAILED: u8 = 3;

    /// Configuration or settings could not be read or written
    pub const CONFIG_ERROR: u8 = 8;

    /// No such port or device
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Device ids rejected by the registry
    pub const VALIDATION_FAILED: u8 = 17;
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

    /// Success with a message for stdout
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
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

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<RegistryError> for CliResult {
    fn from(err: RegistryError) -> Self {
        let code = match err {
            RegistryError::Validation { .. } | RegistryError::Duplicate { .. } => ExitCodes::VALIDATION_FAILED,
            RegistryError::NotFound { .. } => ExitCodes::DEVICE_NOT_FOUND,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::PortNotFound(_) => ExitCodes::DEVICE_NOT_FOUND,
            TransportError::OpenFailed { .. } | TransportError::PermissionDenied(_) => ExitCodes::CONNECTION_FAILED,
            _ => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<ScannerError> for CliResult {
    fn from(err: ScannerError) -> Self {
        match err {
            ScannerError::Transport(e) => e.into(),
            ScannerError::Registry(e) => e.into(),
            ScannerError::Config(e) => e.into(),
        }
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        ExitCodes::SUCCESS => "Success",
        ExitCodes::ERROR => "General error",
        ExitCodes::INVALID_ARGS => "Invalid arguments",
        ExitCodes::CONNECTION_FAILED => "Connection failed",
        ExitCodes::CONFIG_ERROR => "Configuration error",
        ExitCodes::DEVICE_NOT_FOUND => "Device not found",
        ExitCodes::VALIDATION_FAILED => "Validation failed",
        _ => "Unknown error",
    }
}
