//! Top-level error type

use crate::config::ConfigError;
use crate::core::registry::RegistryError;
use crate::core::transport::TransportError;
use thiserror::Error;

/// Any failure surfaced by the scanner library
#[derive(Error, Debug)]
pub enum ScannerError {
    /// Port could not be opened, read or closed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Device table rejected the change
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration or settings could not be loaded or saved
    #[error(transparent)]
    Config(#[from] ConfigError),
}
