//! Wire framing: an 8-byte little-endian header followed by the payload.
//!
//! Header layout is `{size: u16, type: u16, client_id: u16, checksum: u16}`
//! where `size` counts the whole frame and `checksum` is the low half of a
//! CRC32 over the payload bytes.
use std::io::Error as IoError;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Smallest legal frame: header plus a four byte payload.
pub const MIN_PACKET_SIZE: usize = 12;
/// Largest legal frame.
pub const MAX_PACKET_SIZE: usize = 4096;
/// Bytes of header preceding the payload.
pub const HEADER_SIZE: usize = 8;

/// High bit of the type field marks a zlib-compressed payload.
pub const COMPRESSED_FLAG: u16 = 0x8000;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection unexpectedly closed: {0}")]
    ConnectionClosed(#[from] IoError),
    #[error("frame size {0} outside [{MIN_PACKET_SIZE}, {MAX_PACKET_SIZE}]")]
    BadSize(usize),
    #[error("checksum mismatch: header {header:#06x}, computed {computed:#06x}")]
    BadChecksum { header: u16, computed: u16 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub size: u16,
    pub packet_type: u16,
    pub client_id: u16,
    pub checksum: u16,
}

impl FrameHeader {
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0..2].copy_from_slice(&self.size.to_le_bytes());
        raw[2..4].copy_from_slice(&self.packet_type.to_le_bytes());
        raw[4..6].copy_from_slice(&self.client_id.to_le_bytes());
        raw[6..8].copy_from_slice(&self.checksum.to_le_bytes());
        raw
    }

    pub fn from_bytes(raw: [u8; HEADER_SIZE]) -> Self {
        Self {
            size: u16::from_le_bytes([raw[0], raw[1]]),
            packet_type: u16::from_le_bytes([raw[2], raw[3]]),
            client_id: u16::from_le_bytes([raw[4], raw[5]]),
            checksum: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    /// Whether the payload carries the compressed marker.
    pub fn is_compressed(&self) -> bool {
        self.packet_type & COMPRESSED_FLAG != 0
    }

    /// The type with the compression marker stripped.
    pub fn bare_type(&self) -> u16 {
        self.packet_type & !COMPRESSED_FLAG
    }
}

pub fn checksum(payload: &[u8]) -> u16 {
    crc32fast::hash(payload) as u16
}

/// Sends one frame. The payload must already be compressed/encrypted as
/// required; this only prepends the header.
pub async fn send_frame<S: AsyncWriteExt + Unpin>(
    stream: &mut S,
    packet_type: u16,
    client_id: u16,
    payload: &[u8],
) -> Result<(), FrameError> {
    let size = HEADER_SIZE + payload.len();
    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(FrameError::BadSize(size));
    }
    let header = FrameHeader {
        size: size as u16,
        packet_type,
        client_id,
        checksum: checksum(payload),
    };
    stream.write_all(&header.to_bytes()).await?;
    stream.write_all(payload).await?;
    Ok(())
}

/// Receives one frame, validating size bounds and the payload checksum.
pub async fn receive_frame<S: AsyncReadExt + Unpin>(
    stream: &mut S,
) -> Result<(FrameHeader, Vec<u8>), FrameError> {
    let mut raw = [0u8; HEADER_SIZE];
    stream.read_exact(&mut raw).await?;
    let header = FrameHeader::from_bytes(raw);
    let size = header.size as usize;
    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(FrameError::BadSize(size));
    }
    let mut payload = vec![0u8; size - HEADER_SIZE];
    stream.read_exact(&mut payload).await?;
    let computed = checksum(&payload);
    if computed != header.checksum {
        return Err(FrameError::BadChecksum {
            header: header.checksum,
            computed,
        });
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn sends_and_receives_a_frame() {
        let (mut sender, mut receiver) = duplex(4096);
        let payload = vec![1u8, 2, 3, 4, 5];
        send_frame(&mut sender, 0x27A, 7, &payload)
            .await
            .expect("frame should send");
        let (header, received) = receive_frame(&mut receiver)
            .await
            .expect("frame should arrive");
        assert_eq!(header.bare_type(), 0x27A);
        assert_eq!(header.client_id, 7);
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn accepts_min_and_max_sizes() {
        let (mut sender, mut receiver) = duplex(2 * MAX_PACKET_SIZE);
        send_frame(&mut sender, 1, 0, &[0u8; MIN_PACKET_SIZE - HEADER_SIZE])
            .await
            .expect("minimal frame should send");
        receive_frame(&mut receiver).await.expect("minimal frame");

        send_frame(&mut sender, 1, 0, &[0u8; MAX_PACKET_SIZE - HEADER_SIZE])
            .await
            .expect("maximal frame should send");
        receive_frame(&mut receiver).await.expect("maximal frame");
    }

    #[tokio::test]
    async fn rejects_undersized_and_oversized_frames() {
        let (mut sender, _receiver) = duplex(2 * MAX_PACKET_SIZE);
        match send_frame(&mut sender, 1, 0, &[0u8; MIN_PACKET_SIZE - HEADER_SIZE - 1]).await {
            Err(FrameError::BadSize(size)) => assert_eq!(size, MIN_PACKET_SIZE - 1),
            other => panic!("expected BadSize, got {:?}", other),
        }
        match send_frame(&mut sender, 1, 0, &[0u8; MAX_PACKET_SIZE - HEADER_SIZE + 1]).await {
            Err(FrameError::BadSize(size)) => assert_eq!(size, MAX_PACKET_SIZE + 1),
            other => panic!("expected BadSize, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_oversized_header_on_receive() {
        let (mut sender, mut receiver) = duplex(4096);
        let header = FrameHeader {
            size: (MAX_PACKET_SIZE + 1) as u16,
            packet_type: 1,
            client_id: 0,
            checksum: 0,
        };
        sender
            .write_all(&header.to_bytes())
            .await
            .expect("writing should work");
        match receive_frame(&mut receiver).await {
            Err(FrameError::BadSize(size)) => assert_eq!(size, MAX_PACKET_SIZE + 1),
            other => panic!("expected BadSize, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_corrupted_payload() {
        let (mut sender, mut receiver) = duplex(4096);
        let payload = [9u8, 9, 9, 9];
        let header = FrameHeader {
            size: (HEADER_SIZE + payload.len()) as u16,
            packet_type: 1,
            client_id: 0,
            checksum: 0xBEEF,
        };
        sender
            .write_all(&header.to_bytes())
            .await
            .expect("writing should work");
        sender.write_all(&payload).await.expect("writing should work");
        match receive_frame(&mut receiver).await {
            Err(FrameError::BadChecksum { header, .. }) => assert_eq!(header, 0xBEEF),
            other => panic!("expected BadChecksum, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fails_to_receive_from_dropped_connection() {
        let (_, mut receiver) = duplex(4096);
        match receive_frame(&mut receiver).await {
            Err(FrameError::ConnectionClosed(_)) => (),
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
    }
}
