//! # Scanlink Core Library
//!
//! Connects USB-serial barcode scanners and turns their byte stream into
//! classified scans:
//! - Registry of known scanner VID/PID pairs plus a persisted user table
//! - Frame splitting on inter-byte silence
//! - Barcode classification (SSCC, EAN-13, prescription, MDLP DataMatrix, OMC)
//! - Auto-connect polling and hot-plug handling over `tokio-serial`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scanlink_core::{BarcodeParser, ConnectionManager, ScannerEvent, SerialPortProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = ConnectionManager::builder(Arc::new(SerialPortProvider::new()))
//!         .parser(Arc::new(BarcodeParser::new()))
//!         .build();
//!
//!     let mut rx = manager.subscribe();
//!     manager.enable_auto_connect().await;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let ScannerEvent::Data(scan) = event {
//!             println!("{}: {:?}", scan.text, scan.result);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, FileSettingsStore, MemorySettingsStore, ScannerSettings, SettingsStore};
pub use crate::core::connection::{
    ConnectionManager, ConnectionManagerBuilder, ConnectionState, ScanData, ScannerEvent, StatusUpdate,
};
pub use crate::core::error::ScannerError;
pub use crate::core::framing::{Frame, FrameAssembler, FrameReader};
pub use crate::core::parser::{Barcode, BarcodeKind, BarcodeParser, FrameParser, ParseResult};
pub use crate::core::registry::{DeviceDescriptor, DeviceRegistry, DeviceTable, RegistryError};
pub use crate::core::transport::{PortInfo, PortProvider, SerialPortProvider, Transport, TransportError};
pub use crate::utils::autoconnect::AutoConnectConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
