//! Barcode classification
//!
//! The scanner has already decoded the symbol; this module only recognises
//! which kind of payload arrived and pulls out its fields. Rules are tried in
//! order and the first match wins:
//!
//! 1. leading STX (0x02) - OMC binary payload, handed to a [`BinaryFormatHandler`]
//! 2. SSCC - `^0*([0-9]{18})$`
//! 3. EAN-13 - `^[0-9]{13}$`
//! 4. Prescription - `^p([a-zA-Z0-9/+]*==)$`
//! 5. MDLP DataMatrix - GS1 AI 01 (GTIN) and AI 21 (pack id) terminated by GS
//!
//! Anything else is [`ParseResult::UnknownFormat`].

mod mark;
mod omc;

pub use mark::compute_mark;
pub use omc::{BinaryFormatHandler, OmcData, RawOmcHandler};

use crate::core::framing::Frame;
use bytes::Bytes;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// Start-of-text byte that marks an OMC payload
pub const STX: u8 = 0x02;

/// ASCII group separator terminating variable-length GS1 fields
pub const GS: u8 = 0x1D;

static SSCC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^0*([0-9]{18})$").expect("invalid SSCC pattern"));
static EAN13_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{13}$").expect("invalid EAN13 pattern"));
static PRESCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^p([a-zA-Z0-9/+]*==)$").expect("invalid prescription pattern"));
// Byte-level scan so non-UTF-8 prefixes (e.g. FNC1 renderings) cannot break the match
static MDLP_RE: LazyLock<BytesRegex> = LazyLock::new(|| {
    BytesRegex::new(r"(?-u)01([0-9]{14}).*21([!-&%-_/0-9A-Za-z]{13})\x1D").expect("invalid MDLP pattern")
});

/// Barcode kinds this parser recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarcodeKind {
    /// Serial Shipping Container Code
    #[serde(rename = "SSCC")]
    Sscc,
    /// EAN-13
    #[serde(rename = "EAN13")]
    Ean13,
    /// Prescription token
    Prescription,
    /// MDLP GS1 DataMatrix
    #[serde(rename = "MDLP")]
    Mdlp,
    /// Binary OMC payload
    #[serde(rename = "OMC")]
    Omc,
}

impl fmt::Display for BarcodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sscc => write!(f, "SSCC"),
            Self::Ean13 => write!(f, "EAN13"),
            Self::Prescription => write!(f, "Prescription"),
            Self::Mdlp => write!(f, "MDLP"),
            Self::Omc => write!(f, "OMC"),
        }
    }
}

/// Structured barcode record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Barcode {
    /// SSCC with the 18-digit code as captured
    #[serde(rename = "SSCC")]
    Sscc {
        /// 18-digit code
        sscc: String,
    },
    /// EAN-13
    #[serde(rename = "EAN13")]
    Ean13 {
        /// 13-digit code
        ean13: String,
    },
    /// Prescription token, kept opaque
    Prescription {
        /// Full matched text
        prescription: String,
    },
    /// MDLP DataMatrix
    #[serde(rename = "MDLP")]
    Mdlp {
        /// 14-digit GTIN (AI 01)
        gtin: String,
        /// 13-character pack serial (AI 21)
        packid: String,
        /// GTIN followed by pack serial
        sgtin: String,
        /// Base64 of the raw frame without its trailing CR/LF
        mark: String,
    },
    /// OMC binary payload
    #[serde(rename = "OMC")]
    Omc(OmcData),
}

impl Barcode {
    /// Kind of this record
    pub fn kind(&self) -> BarcodeKind {
        match self {
            Self::Sscc { .. } => BarcodeKind::Sscc,
            Self::Ean13 { .. } => BarcodeKind::Ean13,
            Self::Prescription { .. } => BarcodeKind::Prescription,
            Self::Mdlp { .. } => BarcodeKind::Mdlp,
            Self::Omc(_) => BarcodeKind::Omc,
        }
    }
}

/// Rule extraction failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseFailure {
    /// Human-readable cause
    pub message: String,
}

impl ParseFailure {
    /// Create a failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of classifying one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ParseResult {
    /// A rule matched and extracted its fields
    Parsed {
        /// The record
        barcode: Barcode,
    },
    /// A rule matched but extraction failed
    Error {
        /// Rule that failed, when known
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        kind: Option<BarcodeKind>,
        /// Failure description
        message: String,
    },
    /// No rule matched
    UnknownFormat,
}

impl ParseResult {
    /// Kind of the rule that matched, if any
    pub fn kind(&self) -> Option<BarcodeKind> {
        match self {
            Self::Parsed { barcode } => Some(barcode.kind()),
            Self::Error { kind, .. } => *kind,
            Self::UnknownFormat => None,
        }
    }

    /// The parsed record, if any
    pub fn barcode(&self) -> Option<&Barcode> {
        match self {
            Self::Parsed { barcode } => Some(barcode),
            _ => None,
        }
    }

    /// Whether a rule matched and succeeded
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed { .. })
    }
}

/// A frame together with its text form and classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFrame {
    /// Raw frame bytes
    #[serde(with = "raw_hex")]
    pub raw: Bytes,
    /// Decoded, trimmed text
    pub text: String,
    /// Classification
    pub result: ParseResult,
}

/// Serde adapter writing byte buffers as lowercase hex strings
pub(crate) mod raw_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(raw: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(raw))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: From<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map(T::from).map_err(serde::de::Error::custom)
    }
}

/// Turns frames into parse results
///
/// Implementations must not fail: every problem is reported inside the
/// returned [`ParseResult`].
pub trait FrameParser: Send + Sync {
    /// Classify a frame
    fn parse(&self, raw: &[u8], text: &str) -> ParseResult;

    /// Classify a frame, decoding its text form first
    fn parse_frame(&self, frame: &Frame) -> ParsedFrame {
        let text = frame.text();
        let result = self.parse(frame, &text);
        ParsedFrame {
            raw: frame.bytes().clone(),
            text,
            result,
        }
    }
}

/// Parser that classifies nothing
///
/// Useful when only raw frames are wanted; every frame is reported as
/// [`ParseResult::UnknownFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopParser;

impl FrameParser for NoopParser {
    fn parse(&self, _raw: &[u8], _text: &str) -> ParseResult {
        ParseResult::UnknownFormat
    }
}

/// Rule-based barcode parser
#[derive(Clone)]
pub struct BarcodeParser {
    omc: Arc<dyn BinaryFormatHandler>,
}

impl Default for BarcodeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BarcodeParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarcodeParser").finish_non_exhaustive()
    }
}

impl BarcodeParser {
    /// Parser with the default OMC handler
    pub fn new() -> Self {
        Self {
            omc: Arc::new(RawOmcHandler),
        }
    }

    /// Replace the OMC binary handler
    #[must_use]
    pub fn with_omc_handler(mut self, handler: Arc<dyn BinaryFormatHandler>) -> Self {
        self.omc = handler;
        self
    }

    fn tagged(kind: BarcodeKind, outcome: Result<Barcode, ParseFailure>) -> ParseResult {
        match outcome {
            Ok(barcode) => ParseResult::Parsed { barcode },
            Err(failure) => {
                tracing::warn!(%kind, error = %failure, "Barcode extraction failed");
                ParseResult::Error {
                    kind: Some(kind),
                    message: failure.message,
                }
            }
        }
    }

    fn parse_sscc(text: &str) -> Option<Result<Barcode, ParseFailure>> {
        let caps = SSCC_RE.captures(text)?;
        Some(
            caps.get(1)
                .map(|m| Barcode::Sscc {
                    sscc: m.as_str().to_string(),
                })
                .ok_or_else(|| ParseFailure::new("SSCC capture missing")),
        )
    }

    fn parse_ean13(text: &str) -> Option<Result<Barcode, ParseFailure>> {
        EAN13_RE.is_match(text).then(|| {
            Ok(Barcode::Ean13 {
                ean13: text.to_string(),
            })
        })
    }

    fn parse_prescription(text: &str) -> Option<Result<Barcode, ParseFailure>> {
        PRESCRIPTION_RE.is_match(text).then(|| {
            Ok(Barcode::Prescription {
                prescription: text.to_string(),
            })
        })
    }

    fn parse_mdlp(raw: &[u8]) -> Option<Result<Barcode, ParseFailure>> {
        let caps = MDLP_RE.captures(raw)?;
        Some(Self::extract_mdlp(&caps, raw))
    }

    fn extract_mdlp(caps: &regex::bytes::Captures<'_>, raw: &[u8]) -> Result<Barcode, ParseFailure> {
        let field = |index: usize, name: &str| {
            caps.get(index)
                .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                .ok_or_else(|| ParseFailure::new(format!("MDLP DataMatrix parsing error: {name} missing")))
        };
        let gtin = field(1, "GTIN")?;
        let packid = field(2, "pack id")?;
        let mark = compute_mark(raw)
            .map_err(|e| ParseFailure::new(format!("MDLP DataMatrix parsing error: {e}")))?;

        Ok(Barcode::Mdlp {
            sgtin: format!("{gtin}{packid}"),
            gtin,
            packid,
            mark,
        })
    }
}

impl FrameParser for BarcodeParser {
    fn parse(&self, raw: &[u8], text: &str) -> ParseResult {
        if raw.first() == Some(&STX) {
            return Self::tagged(BarcodeKind::Omc, self.omc.parse(raw).map(Barcode::Omc));
        }

        if let Some(outcome) = Self::parse_sscc(text) {
            return Self::tagged(BarcodeKind::Sscc, outcome);
        }
        if let Some(outcome) = Self::parse_ean13(text) {
            return Self::tagged(BarcodeKind::Ean13, outcome);
        }
        if let Some(outcome) = Self::parse_prescription(text) {
            return Self::tagged(BarcodeKind::Prescription, outcome);
        }
        if let Some(outcome) = Self::parse_mdlp(raw) {
            return Self::tagged(BarcodeKind::Mdlp, outcome);
        }

        tracing::debug!(len = raw.len(), "No barcode rule matched");
        ParseResult::UnknownFormat
    }
}
