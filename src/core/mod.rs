//! Core module containing the scanner pipeline
//!
//! This module provides:
//! - Device registry of known and user-added scanners
//! - Inter-byte timeout framing
//! - Barcode classification
//! - Serial transport with hot-plug monitoring
//! - Connection management with auto-connect

pub mod connection;
pub mod error;
pub mod framing;
pub mod history;
pub mod parser;
pub mod registry;
pub mod transport;
