use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: command (1) + payload length (2) = 3 bytes.
pub const HEADER_SIZE: usize = 3;

/// Authentication tag appended after the encrypted header and payload.
pub const MAC_SIZE: usize = 4;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A decrypted access-point frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command byte, see [`crate::command`].
    pub command: u8,
    /// The decrypted payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload + tag).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + MAC_SIZE
    }
}

/// Append the plaintext header and payload to `dst`.
///
/// Plaintext layout (encrypted as one unit, tag appended afterwards):
/// ```text
/// ┌──────────┬────────────┬──────────────────┐┌──────────┐
/// │ Command  │ Length     │ Payload          ││ Tag (4B) │
/// │ (1B)     │ (2B BE)    │ (Length bytes)   ││          │
/// └──────────┴────────────┴──────────────────┘└──────────┘
/// ```
pub fn encode_plain(command: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len() + MAC_SIZE);
    dst.put_u8(command);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Split a decrypted header into command and payload length.
pub fn parse_header(header: &[u8; HEADER_SIZE]) -> (u8, usize) {
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;
    (header[0], len)
}

/// Configuration for the frame reader and writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default and ceiling: 65535.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: Some(std::time::Duration::from_secs(10)),
        }
    }
}

impl FrameConfig {
    /// Effective payload limit, never above what the length field can carry.
    pub fn payload_limit(&self) -> usize {
        self.max_payload_size.min(MAX_PAYLOAD)
    }
}
