//! OMC binary payloads
//!
//! Frames starting with STX carry a binary OMC record. Its internal layout is
//! deployment specific, so decoding goes through [`BinaryFormatHandler`].

use super::ParseFailure;
use serde::{Deserialize, Serialize};

/// Decoded OMC record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmcData {
    /// Raw payload bytes, STX included
    #[serde(with = "super::raw_hex")]
    pub payload: Vec<u8>,
}

/// Decoder for STX-prefixed binary frames
pub trait BinaryFormatHandler: Send + Sync {
    /// Decode a frame whose first byte is STX
    fn parse(&self, raw: &[u8]) -> Result<OmcData, ParseFailure>;
}

/// Passes the payload through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawOmcHandler;

impl BinaryFormatHandler for RawOmcHandler {
    fn parse(&self, raw: &[u8]) -> Result<OmcData, ParseFailure> {
        Ok(OmcData {
            payload: raw.to_vec(),
        })
    }
}
