use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use spotwire_transport::ApStream;

use crate::cipher::Encryptor;
use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Anything that can put one `(command, payload)` frame on the wire.
///
/// The sequential dispatcher owns exactly one sink and calls it from its
/// worker thread, which is what keeps frame writes from interleaving.
pub trait PacketSink: Send {
    /// Encrypt and write one frame as a single unit.
    fn send_packet(&mut self, command: u8, payload: &[u8]) -> Result<()>;
}

/// Encrypts and writes complete frames to any `Write` stream.
///
/// Each frame is assembled in full (header, ciphertext, tag) before the
/// first byte is written, then written out in one pass.
pub struct FrameWriter<T> {
    inner: T,
    encryptor: Encryptor,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T, encryptor: Encryptor) -> Self {
        Self::with_config(inner, encryptor, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, encryptor: Encryptor, config: FrameConfig) -> Self {
        Self {
            inner,
            encryptor,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encrypt and send a payload under a command byte.
    pub fn send(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        let max = self.config.payload_limit();
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.buf.clear();
        self.encryptor.encode(command, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Next send-direction nonce.
    pub fn next_nonce(&self) -> u32 {
        self.encryptor.next_nonce()
    }
}

impl<T: Write + Send> PacketSink for FrameWriter<T> {
    fn send_packet(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        self.send(command, payload)
    }
}

impl FrameWriter<ApStream> {
    /// Create a frame writer for `ApStream` and apply write timeout from config.
    pub fn with_config_ap(inner: ApStream, encryptor: Encryptor, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, encryptor, config))
    }
}
