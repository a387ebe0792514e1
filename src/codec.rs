//! Text codec for message-oriented carriers
//!
//! Binary frames are carried inside chat message bodies as base64 using the
//! standard alphabet (`A-Z`, `a-z`, `0-9`, `+`, `/`) with `=` padding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoded length {0} is not a multiple of 4")]
    InvalidLength(usize),

    #[error("Invalid encoded input: {0}")]
    InvalidInput(String),
}

/// Encode bytes as padded base64 text
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode padded base64 text
///
/// Rejects input whose length is not a multiple of 4 and any character
/// outside the alphabet and padding set (whitespace included).
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    if text.len() % 4 != 0 {
        return Err(CodecError::InvalidLength(text.len()));
    }
    STANDARD
        .decode(text)
        .map_err(|e| CodecError::InvalidInput(e.to_string()))
}
