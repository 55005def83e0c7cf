//! Deflate + JSON codec for series payloads.

use crate::series::SeriesPayload;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Largest inflated body `decode` accepts.
pub const DEFAULT_MAX_INFLATED_SIZE: usize = 64 * 1024 * 1024;

/// Inflate a zlib stream and parse it as a series payload.
pub fn decode(raw: &[u8]) -> Result<SeriesPayload, CodecError> {
    decode_with_limit(raw, DEFAULT_MAX_INFLATED_SIZE)
}

/// Like [`decode`], but refuses streams that inflate past `limit` bytes.
pub fn decode_with_limit(raw: &[u8], limit: usize) -> Result<SeriesPayload, CodecError> {
    let capacity = raw.len().saturating_mul(4).min(limit);
    let mut inflated = Vec::with_capacity(capacity);

    // One byte past the limit tells a stream of exactly `limit` bytes apart
    // from a longer one.
    ZlibDecoder::new(raw)
        .take(limit as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(CodecError::Decompression)?;
    if inflated.len() > limit {
        return Err(CodecError::TooLarge { limit });
    }

    serde_json::from_slice(&inflated).map_err(CodecError::MalformedPayload)
}

/// Serialize a series payload and deflate it into a zlib stream.
pub fn encode(payload: &SeriesPayload) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(payload).map_err(CodecError::Encoding)?;

    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(json.len() / 2),
        Compression::default(),
    );
    encoder.write_all(&json).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("body is not a valid deflate stream: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("body inflates past {limit} bytes")]
    TooLarge { limit: usize },

    #[error("body is not a valid series payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("failed to serialize series payload: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("failed to compress series payload: {0}")]
    Compression(#[source] std::io::Error),
}
