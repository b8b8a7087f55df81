//! Length-prefixed frame codec for `tokio_util::codec::Framed`.
//!
//! ```text
//!  0      4          8          12
//!  ┌──────┬──────────┬──────────┬─────────────────────────┐
//!  │ TRS1 │ checksum │  length  │ body (nonce ‖ ciphertext)│
//!  └──────┴──────────┴──────────┴─────────────────────────┘
//! ```
//!
//! `checksum` is the first four bytes of the BLAKE3 hash of the body, and
//! both integers are little-endian. The codec never looks inside the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TrussError;

pub const FRAME_MAGIC: [u8; 4] = *b"TRS1";
pub const HEADER_LENGTH: usize = 12;
pub const MAX_FRAME_BODY: usize = 1024 * 1024;

/// BLAKE3-derived 32-bit body checksum.
pub fn body_checksum(body: &[u8]) -> u32 {
    let hash = blake3::hash(body);
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_body: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_body: MAX_FRAME_BODY,
        }
    }

    pub fn with_max_body(max_body: usize) -> Self {
        Self { max_body }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = TrussError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }
        if src[..4] != FRAME_MAGIC {
            return Err(TrussError::InvalidMagic);
        }

        let checksum = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
        let length = u32::from_le_bytes([src[8], src[9], src[10], src[11]]) as usize;
        if length > self.max_body {
            return Err(TrussError::FrameTooLarge {
                size: length,
                max: self.max_body,
            });
        }

        if src.len() < HEADER_LENGTH + length {
            src.reserve(HEADER_LENGTH + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LENGTH);
        let body = src.split_to(length).freeze();
        if body_checksum(&body) != checksum {
            return Err(TrussError::ChecksumMismatch);
        }
        Ok(Some(body))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TrussError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if body.len() > self.max_body {
            return Err(TrussError::FrameTooLarge {
                size: body.len(),
                max: self.max_body,
            });
        }
        dst.reserve(HEADER_LENGTH + body.len());
        dst.put_slice(&FRAME_MAGIC);
        dst.put_u32_le(body_checksum(&body));
        dst.put_u32_le(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}
