//! Mercury message layout.
//!
//! A Mercury payload is:
//! - `seq_len: u16 BE`, then `seq_len` bytes of sequence id
//! - `flags: u8` (bit 0 = final, bit 1 = partial)
//! - `part_count: u16 BE`, then each part as `len: u16 BE` + bytes
//!
//! The first part of a complete message is a protobuf [`Header`].

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use spotwire_frame::command::{MERCURY_REQ, MERCURY_SUB, MERCURY_UNSUB};

use crate::error::{MercuryError, Result};
use crate::proto::{Header, UserField};

/// Flag bit marking the last frame of a message.
pub const FLAG_FINAL: u8 = 0x01;

/// Flag bit set by the server on frames whose last part continues in the
/// next frame. Parts are still kept exactly as framed.
pub const FLAG_PARTIAL: u8 = 0x02;

/// Encode a sequence counter as its minimal big-endian byte string.
///
/// Zero encodes as a single `0x00` byte.
pub fn encode_sequence_id(id: u64) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let first = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

/// Mercury request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MercuryMethod {
    Get,
    Sub,
    Unsub,
    Send,
}

impl MercuryMethod {
    /// Command byte the request travels under.
    pub fn command(self) -> u8 {
        match self {
            MercuryMethod::Get | MercuryMethod::Send => MERCURY_REQ,
            MercuryMethod::Sub => MERCURY_SUB,
            MercuryMethod::Unsub => MERCURY_UNSUB,
        }
    }

    /// Method name written into the header.
    pub fn as_str(self) -> &'static str {
        match self {
            MercuryMethod::Get => "GET",
            MercuryMethod::Sub => "SUB",
            MercuryMethod::Unsub => "UNSUB",
            MercuryMethod::Send => "SEND",
        }
    }
}

impl fmt::Display for MercuryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MercuryMethod {
    type Err = MercuryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(MercuryMethod::Get),
            "SUB" => Ok(MercuryMethod::Sub),
            "UNSUB" => Ok(MercuryMethod::Unsub),
            "SEND" => Ok(MercuryMethod::Send),
            other => Err(MercuryError::Protocol(format!("unknown method '{other}'"))),
        }
    }
}

/// An outbound Mercury request.
#[derive(Debug, Clone, PartialEq)]
pub struct MercuryRequest {
    pub method: MercuryMethod,
    pub uri: String,
    pub content_type: Option<String>,
    pub user_fields: Vec<(String, Vec<u8>)>,
    /// Parts sent after the header part.
    pub payload: Vec<Bytes>,
}

impl MercuryRequest {
    pub fn new(method: MercuryMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            content_type: None,
            user_fields: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(MercuryMethod::Get, uri)
    }

    pub fn send(uri: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(MercuryMethod::Send, uri).with_part(body)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_user_field(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.user_fields.push((key.into(), value.into()));
        self
    }

    pub fn with_part(mut self, part: impl Into<Bytes>) -> Self {
        self.payload.push(part.into());
        self
    }

    /// Protobuf header describing this request.
    pub fn header(&self) -> Header {
        Header {
            uri: Some(self.uri.clone()),
            content_type: self.content_type.clone(),
            method: Some(self.method.as_str().to_string()),
            status_code: None,
            user_fields: self
                .user_fields
                .iter()
                .map(|(key, value)| UserField {
                    key: Some(key.clone()),
                    value: Some(value.clone()),
                })
                .collect(),
        }
    }

    /// Build the single final packet carrying this request.
    pub fn to_packet(&self, sequence: Vec<u8>) -> MercuryPacket {
        let mut parts = Vec::with_capacity(self.payload.len() + 1);
        parts.push(Bytes::from(self.header().encode_to_vec()));
        parts.extend(self.payload.iter().cloned());
        MercuryPacket {
            sequence,
            flags: FLAG_FINAL,
            parts,
        }
    }
}

/// One Mercury payload as carried by a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MercuryPacket {
    pub sequence: Vec<u8>,
    pub flags: u8,
    pub parts: Vec<Bytes>,
}

impl MercuryPacket {
    pub fn is_final(&self) -> bool {
        self.flags & FLAG_FINAL != 0
    }

    pub fn is_partial(&self) -> bool {
        self.flags & FLAG_PARTIAL != 0
    }

    /// Read only the sequence id of an encoded payload.
    ///
    /// Used to attribute a payload that fails full decoding.
    pub fn peek_sequence(payload: &[u8]) -> Option<&[u8]> {
        let len = u16::from_be_bytes([*payload.first()?, *payload.get(1)?]) as usize;
        payload.get(2..2 + len)
    }

    /// Serialize into a frame payload.
    pub fn encode(&self) -> Result<Bytes> {
        let seq_len = u16_len(self.sequence.len(), "sequence id")?;
        let part_count = u16_len(self.parts.len(), "part count")?;

        let size = 2
            + self.sequence.len()
            + 1
            + 2
            + self.parts.iter().map(|p| 2 + p.len()).sum::<usize>();
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u16(seq_len);
        buf.put_slice(&self.sequence);
        buf.put_u8(self.flags);
        buf.put_u16(part_count);
        for part in &self.parts {
            buf.put_u16(u16_len(part.len(), "part")?);
            buf.put_slice(part);
        }
        Ok(buf.freeze())
    }

    /// Parse a frame payload. Parts share the payload's allocation.
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let seq_len = take_u16(&mut payload, "sequence length")? as usize;
        let sequence = take_bytes(&mut payload, seq_len, "sequence id")?.to_vec();
        if payload.remaining() < 1 {
            return Err(truncated("flags"));
        }
        let flags = payload.get_u8();
        let part_count = take_u16(&mut payload, "part count")?;

        let mut parts = Vec::with_capacity(part_count as usize);
        for _ in 0..part_count {
            let len = take_u16(&mut payload, "part length")? as usize;
            parts.push(take_bytes(&mut payload, len, "part")?);
        }

        if payload.has_remaining() {
            return Err(MercuryError::Protocol(format!(
                "{} trailing bytes after {} parts",
                payload.remaining(),
                part_count
            )));
        }

        Ok(Self {
            sequence,
            flags,
            parts,
        })
    }
}

fn u16_len(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| MercuryError::Encode(format!("{what} too long ({len})")))
}

fn truncated(what: &str) -> MercuryError {
    MercuryError::Protocol(format!("mercury payload truncated in {what}"))
}

fn take_u16(buf: &mut Bytes, what: &str) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(truncated(what));
    }
    Ok(buf.get_u16())
}

fn take_bytes(buf: &mut Bytes, len: usize, what: &str) -> Result<Bytes> {
    if buf.remaining() < len {
        return Err(truncated(what));
    }
    Ok(buf.split_to(len))
}

/// A complete inbound Mercury message: a response or a push.
#[derive(Debug, Clone, PartialEq)]
pub struct MercuryResponse {
    pub sequence_id: Vec<u8>,
    pub uri: String,
    pub status_code: i32,
    pub content_type: Option<String>,
    pub user_fields: Vec<(String, Vec<u8>)>,
    /// Parts after the header, in arrival order.
    pub payload: Vec<Bytes>,
}

impl MercuryResponse {
    /// Interpret assembled parts; the first must be a header.
    pub fn from_parts(sequence_id: Vec<u8>, mut parts: Vec<Bytes>) -> Result<Self> {
        if parts.is_empty() {
            return Err(MercuryError::Protocol("message has no header part".into()));
        }
        let header_part = parts.remove(0);
        let header = Header::decode(header_part)
            .map_err(|err| MercuryError::Protocol(format!("invalid header: {err}")))?;

        Ok(Self {
            sequence_id,
            uri: header.uri.unwrap_or_default(),
            status_code: header.status_code.unwrap_or_default(),
            content_type: header.content_type,
            user_fields: header
                .user_fields
                .into_iter()
                .map(|f| (f.key.unwrap_or_default(), f.value.unwrap_or_default()))
                .collect(),
            payload: parts,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code) || self.status_code == 0
    }

    /// Turn a status of 400 or above into [`MercuryError::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.status_code >= 400 {
            return Err(MercuryError::Status {
                code: self.status_code,
                uri: self.uri,
            });
        }
        Ok(self)
    }

    /// First payload part, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.payload.first()
    }
}
