//! Encoding of embeddings for durable storage.
//!
//! Vectors are stored as base64 over little-endian f32 bytes. Rows that went
//! through a Postgres `bytea` column come back as `\x<hex>`, where the hex
//! spells the base64 text, so both forms decode here.

use crate::types::StoredVector;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

const F32_BYTES: usize = std::mem::size_of::<f32>();
const BYTEA_HEX_PREFIX: &str = "\\x";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("invalid hex escape: {0}")]
    Hex(String),
    #[error("hex-escaped payload is not utf-8")]
    Utf8,
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("stored embedding is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}

/// Base64 text of the little-endian bytes of `values`.
pub fn encode_embedding(values: &[f32]) -> String {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Decode a stored vector into exactly `dimension` floats.
pub fn decode_embedding(stored: &StoredVector, dimension: usize) -> Result<Vec<f32>, CodecError> {
    let bytes = match stored {
        StoredVector::Bytes(bytes) => bytes.clone(),
        StoredVector::Text(text) => decode_text(text)?,
    };

    let expected = dimension * F32_BYTES;
    if bytes.len() != expected {
        return Err(CodecError::WrongLength {
            expected,
            actual: bytes.len(),
        });
    }

    Ok(bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_text(text: &str) -> Result<Vec<u8>, CodecError> {
    let text = text.trim();
    match text.strip_prefix(BYTEA_HEX_PREFIX) {
        Some(digits) => {
            let raw = hex::decode(digits).map_err(|e| CodecError::Hex(e.to_string()))?;
            let inner = String::from_utf8(raw).map_err(|_| CodecError::Utf8)?;
            STANDARD
                .decode(inner.trim())
                .map_err(|e| CodecError::Base64(e.to_string()))
        }
        None => STANDARD
            .decode(text)
            .map_err(|e| CodecError::Base64(e.to_string())),
    }
}
