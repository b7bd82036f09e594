//! MDLP mark computation

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Base64 of the raw frame with a single trailing CR/LF (or lone CR) removed
///
/// The suffix is stripped on the lowercase hex rendering, so only a
/// byte-aligned `0d0a` or `0d` ending is affected.
pub fn compute_mark(raw: &[u8]) -> Result<String, hex::FromHexError> {
    let encoded = hex::encode(raw);
    let trimmed = encoded
        .strip_suffix("0d0a")
        .or_else(|| encoded.strip_suffix("0d"))
        .unwrap_or(&encoded);
    let bytes = hex::decode(trimmed)?;
    Ok(STANDARD.encode(bytes))
}
