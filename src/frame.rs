// SPDX-License-Identifier: MIT
//! Frame codec for the metadata section
//!
//! ```text
//! Magic: "RPKF" (4 bytes)
//! Version: 1 (u16)
//! Reserved: 0 (u16)
//! Content length: uncompressed bytes (u64)
//! Content checksum: 64-bit checksum of the uncompressed bytes (u64)
//! Payload: one zstd frame
//! ```
//!
//! Decoding either returns the complete, verified content or an error.

use tracing::debug;

use crate::checksum::content_checksum;
use crate::error::{ContainerError, Result};
use crate::format::ByteReader;

pub const FRAME_MAGIC: &[u8; 4] = b"RPKF";
pub const FRAME_VERSION: u16 = 1;
pub const FRAME_HEADER_SIZE: usize = 24;

/// Upper bound on declared content length, checked before allocating
pub const MAX_FRAME_CONTENT: u64 = 1 << 30;

const ZSTD_LEVEL: i32 = 3;

/// Wrap `content` in a frame
pub fn encode_frame(content: &[u8]) -> Result<Vec<u8>> {
    if content.len() as u64 > MAX_FRAME_CONTENT {
        return Err(ContainerError::config(format!(
            "Metadata section too large: {} bytes",
            content.len()
        )));
    }

    let payload = zstd::bulk::compress(content, ZSTD_LEVEL)?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&0u16.to_le_bytes());
    frame.extend_from_slice(&(content.len() as u64).to_le_bytes());
    frame.extend_from_slice(&content_checksum(content).to_le_bytes());
    frame.extend_from_slice(&payload);

    debug!(
        content = content.len(),
        framed = frame.len(),
        "Encoded metadata frame"
    );
    Ok(frame)
}

/// Unwrap a frame produced by [`encode_frame`]
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(frame);

    if reader.take(4)? != FRAME_MAGIC {
        return Err(ContainerError::format("Invalid metadata frame magic"));
    }
    let version = reader.read_u16()?;
    if version != FRAME_VERSION {
        return Err(ContainerError::format(format!(
            "Unsupported metadata frame version {}",
            version
        )));
    }
    reader.read_u16()?;

    let content_length = reader.read_u64()?;
    let checksum = reader.read_u64()?;
    if content_length > MAX_FRAME_CONTENT {
        return Err(ContainerError::format(format!(
            "Metadata frame declares {} bytes of content",
            content_length
        )));
    }

    let payload = reader.take(reader.remaining())?;
    let content = zstd::bulk::decompress(payload, content_length as usize)
        .map_err(|e| ContainerError::format(format!("Metadata frame payload: {}", e)))?;

    if content.len() as u64 != content_length {
        return Err(ContainerError::format(format!(
            "Metadata frame length mismatch: expected {}, got {}",
            content_length,
            content.len()
        )));
    }
    if content_checksum(&content) != checksum {
        return Err(ContainerError::format("Metadata frame checksum mismatch"));
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        (0..4096u32).flat_map(|i| (i % 97).to_le_bytes()).collect()
    }

    #[test]
    fn test_round_trip() {
        let content = sample();
        let frame = encode_frame(&content).unwrap();
        assert!(frame.len() < content.len());
        assert_eq!(decode_frame(&frame).unwrap(), content);
    }

    #[test]
    fn test_empty_content() {
        let frame = encode_frame(&[]).unwrap();
        assert!(decode_frame(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut frame = encode_frame(&sample()).unwrap();
        frame[0] = b'X';
        assert!(matches!(decode_frame(&frame), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_truncated() {
        let frame = encode_frame(&sample()).unwrap();
        for len in [0, 3, FRAME_HEADER_SIZE - 1, frame.len() - 1] {
            assert!(
                matches!(decode_frame(&frame[..len]), Err(ContainerError::Format(_))),
                "truncated to {}",
                len
            );
        }
    }

    #[test]
    fn test_checksum_flip() {
        let mut frame = encode_frame(&sample()).unwrap();
        frame[16] ^= 0x01;
        assert!(matches!(decode_frame(&frame), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut frame = encode_frame(&sample()).unwrap();
        frame[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(decode_frame(&frame), Err(ContainerError::Format(_))));
    }
}
