//! Optional zlib payload compression.
//!
//! Payloads shorter than the threshold are never compressed, and a
//! compressed form that fails to actually shrink the payload is discarded so
//! the flag on the wire always pays for itself.
use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use thiserror::Error;

use crate::frame::MAX_PACKET_SIZE;

/// Default minimum payload size considered worth compressing.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 256;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("inflate failed: {0}")]
    Inflate(std::io::Error),
    #[error("decompressed payload exceeds {MAX_PACKET_SIZE} bytes")]
    TooLarge,
}

/// Compresses `payload` when it is at least `threshold` bytes and the
/// compressed form is strictly smaller. Returns the bytes to put on the wire
/// and whether they are compressed.
pub fn maybe_compress(payload: &[u8], threshold: usize) -> (Vec<u8>, bool) {
    if payload.len() < threshold {
        return (payload.to_vec(), false);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(payload).is_err() {
        return (payload.to_vec(), false);
    }
    match encoder.finish() {
        Ok(compressed) if compressed.len() < payload.len() => (compressed, true),
        _ => (payload.to_vec(), false),
    }
}

pub fn decompress(payload: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut decoder = ZlibDecoder::new(payload).take(MAX_PACKET_SIZE as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CompressError::Inflate)?;
    if out.len() > MAX_PACKET_SIZE {
        return Err(CompressError::TooLarge);
    }
    Ok(out)
}
