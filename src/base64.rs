// Base64 wrapping for DBGp payloads
//
// Command payloads travel as base64 after the " -- " separator, and any
// response element marked encoding="base64" carries encoded text content.

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine as _;

use crate::error::{DbgpError, DbgpResult};

/// Encode raw bytes for transmission inside a command.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a base64 string received from the engine.
///
/// Any character outside the 64-symbol alphabet (plus `=` padding) is a
/// decoder error.
pub fn decode(encoded: &str) -> DbgpResult<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| DbgpError::Decoder(e.to_string()))
}

/// Number of raw bytes a base64 string will decode to, accounting for
/// `=` padding.
pub fn data_length(encoded: &str) -> usize {
    let encoded = encoded.trim();
    let mut len = 3 * (encoded.len() / 4);
    if encoded.ends_with("==") {
        len -= 2;
    } else if encoded.ends_with('=') {
        len -= 1;
    }
    len
}
