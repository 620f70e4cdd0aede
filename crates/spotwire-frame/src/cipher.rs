//! Per-direction Shannon cipher state.
//!
//! Each direction keys its own Shannon instance and re-nonces it with a
//! 32-bit counter at the start of every frame. The counter never resets, so
//! both ends must process frames in exactly the same order. A failed
//! verification on the receive side poisons the decryptor for good.

use std::fmt;

use bytes::{Buf, BytesMut};
use shannon::Shannon;
use tracing::warn;

use crate::codec::{encode_plain, parse_header, Frame, HEADER_SIZE, MAC_SIZE, MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// Strictly increasing 32-bit frame counter.
#[derive(Debug, Clone, Copy, Default)]
struct NonceCounter {
    next: u32,
    exhausted: bool,
}

impl NonceCounter {
    fn advance(&mut self) -> Result<u32> {
        if self.exhausted {
            return Err(FrameError::NonceExhausted);
        }
        let current = self.next;
        match self.next.checked_add(1) {
            Some(next) => self.next = next,
            None => self.exhausted = true,
        }
        Ok(current)
    }
}

/// Send half: encrypts and tags outbound frames.
pub struct Encryptor {
    cipher: Shannon,
    nonce: NonceCounter,
}

impl Encryptor {
    /// Key a new send half. The first frame uses nonce 0.
    pub fn new(key: &[u8]) -> Self {
        Self {
            cipher: Shannon::new(key),
            nonce: NonceCounter::default(),
        }
    }

    /// Nonce the next frame will use.
    pub fn next_nonce(&self) -> u32 {
        self.nonce.next
    }

    /// Encrypt one frame and append header, ciphertext and tag to `dst`.
    ///
    /// An oversized payload is rejected before the nonce advances, so the
    /// session stays usable.
    pub fn encode(&mut self, command: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        let nonce = self.nonce.advance()?;

        let offset = dst.len();
        encode_plain(command, payload, dst)?;

        self.cipher.nonce_u32(nonce);
        self.cipher.encrypt(&mut dst[offset..]);

        let mut mac = [0u8; MAC_SIZE];
        self.cipher.finish(&mut mac);
        dst.extend_from_slice(&mac);
        Ok(())
    }

    /// Encrypt one frame into a fresh buffer.
    pub fn encrypt_frame(&mut self, command: u8, payload: &[u8]) -> Result<BytesMut> {
        let mut wire = BytesMut::with_capacity(HEADER_SIZE + payload.len() + MAC_SIZE);
        self.encode(command, payload, &mut wire)?;
        Ok(wire)
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("next_nonce", &self.nonce.next)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    Payload { command: u8, len: usize, nonce: u32 },
}

/// Receive half: decrypts and verifies inbound frames.
pub struct Decryptor {
    cipher: Shannon,
    nonce: NonceCounter,
    state: DecodeState,
    max_payload: usize,
    poisoned: bool,
}

impl Decryptor {
    /// Key a new receive half. The first frame uses nonce 0.
    pub fn new(key: &[u8]) -> Self {
        Self {
            cipher: Shannon::new(key),
            nonce: NonceCounter::default(),
            state: DecodeState::Header,
            max_payload: MAX_PAYLOAD,
            poisoned: false,
        }
    }

    /// Nonce the next frame will use.
    pub fn next_nonce(&self) -> u32 {
        self.nonce.next
    }

    /// Lower the accepted inbound payload size.
    pub fn set_max_payload_size(&mut self, max_payload: usize) {
        self.max_payload = max_payload.min(MAX_PAYLOAD);
    }

    /// Whether an earlier failure made this half unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Decode the next frame from a buffer of wire bytes.
    ///
    /// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
    /// The header is decrypted as soon as it is available so the payload
    /// length is known; consumed bytes are removed from `src`.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if self.poisoned {
            return Err(FrameError::Poisoned);
        }
        let result = self.decode_inner(src);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn decode_inner(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let DecodeState::Header = self.state {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }
            let nonce = self.nonce.advance()?;
            let mut header = [0u8; HEADER_SIZE];
            header.copy_from_slice(&src[..HEADER_SIZE]);
            src.advance(HEADER_SIZE);

            self.cipher.nonce_u32(nonce);
            self.cipher.decrypt(&mut header);

            let (command, len) = parse_header(&header);
            if len > self.max_payload {
                return Err(FrameError::PayloadTooLarge {
                    size: len,
                    max: self.max_payload,
                });
            }
            self.state = DecodeState::Payload {
                command,
                len,
                nonce,
            };
        }

        let DecodeState::Payload {
            command,
            len,
            nonce,
        } = self.state
        else {
            return Ok(None);
        };
        if src.len() < len + MAC_SIZE {
            return Ok(None);
        }

        self.state = DecodeState::Header;
        let mut payload = src.split_to(len);
        let mac = src.split_to(MAC_SIZE);

        self.cipher.decrypt(&mut payload);
        if self.cipher.check_mac(&mac).is_err() {
            warn!(nonce, command, "frame authentication failed");
            return Err(FrameError::Authentication { nonce });
        }

        Ok(Some(Frame {
            command,
            payload: payload.freeze(),
        }))
    }

    /// Decrypt exactly one complete frame.
    ///
    /// `wire` must hold one whole frame and nothing else. Any failure,
    /// including a length mismatch, poisons this half.
    pub fn decrypt_frame(&mut self, wire: &[u8]) -> Result<Frame> {
        let mut buf = BytesMut::from(wire);
        match self.decode(&mut buf)? {
            Some(frame) if buf.is_empty() => Ok(frame),
            Some(_) => {
                self.poisoned = true;
                Err(FrameError::Malformed(format!(
                    "{} trailing bytes after frame",
                    buf.len()
                )))
            }
            None => {
                self.poisoned = true;
                Err(FrameError::Malformed(format!(
                    "truncated frame ({} bytes)",
                    wire.len()
                )))
            }
        }
    }
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("next_nonce", &self.nonce.next)
            .field("state", &self.state)
            .field("poisoned", &self.poisoned)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Both cipher directions for one connection.
///
/// Construct exactly one per transport connection. For threaded use, call
/// [`CipherSession::split`] so the writer owns the send half and the reader
/// owns the receive half; neither counter is then shared.
#[derive(Debug)]
pub struct CipherSession {
    send: Encryptor,
    recv: Decryptor,
}

impl CipherSession {
    /// Key both directions from already-derived keys.
    pub fn new(send_key: &[u8], recv_key: &[u8]) -> Self {
        Self {
            send: Encryptor::new(send_key),
            recv: Decryptor::new(recv_key),
        }
    }

    /// Encrypt and tag one outbound frame.
    pub fn encrypt_frame(&mut self, command: u8, payload: &[u8]) -> Result<BytesMut> {
        self.send.encrypt_frame(command, payload)
    }

    /// Decrypt and verify one complete inbound frame.
    pub fn decrypt_frame(&mut self, wire: &[u8]) -> Result<Frame> {
        self.recv.decrypt_frame(wire)
    }

    /// Next send-direction nonce.
    pub fn send_nonce(&self) -> u32 {
        self.send.next_nonce()
    }

    /// Next receive-direction nonce.
    pub fn recv_nonce(&self) -> u32 {
        self.recv.next_nonce()
    }

    /// Separate the two directions.
    pub fn split(self) -> (Encryptor, Decryptor) {
        (self.send, self.recv)
    }
}
