//! Events published by the connection manager

use crate::core::parser::{ParseResult, ParsedFrame};
use crate::core::registry::DeviceTable;
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Connection outcome carried by a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// A port was opened
    Connected,
    /// The port was released or could not be opened
    Disconnected,
}

/// Human-readable status notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Message for display
    pub message: String,
    /// Connection outcome, when the update reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConnectionKind>,
}

impl StatusUpdate {
    /// Status without a connection outcome
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    /// Status reporting an open port
    pub fn connected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(ConnectionKind::Connected),
        }
    }

    /// Status reporting a released port
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(ConnectionKind::Disconnected),
        }
    }
}

/// One scanned frame with its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanData {
    /// When the frame was cut
    pub timestamp: DateTime<Local>,
    /// Raw frame bytes
    #[serde(with = "crate::core::parser::raw_hex")]
    pub raw: Bytes,
    /// Decoded, trimmed text
    pub text: String,
    /// Classification
    pub result: ParseResult,
}

impl From<ParsedFrame> for ScanData {
    fn from(parsed: ParsedFrame) -> Self {
        Self {
            timestamp: Local::now(),
            raw: parsed.raw,
            text: parsed.text,
            result: parsed.result,
        }
    }
}

/// Event published to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "detail", rename_all = "kebab-case")]
pub enum ScannerEvent {
    /// A frame was read and classified
    Data(ScanData),
    /// Connection or registry status changed
    Status(StatusUpdate),
    /// The user device table changed
    DevicesUpdated(DeviceTable),
}
