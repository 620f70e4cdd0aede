use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use spotwire_transport::ApStream;

use crate::cipher::Decryptor;
use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads, decrypts and verifies complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Owns the receive half of the cipher, so there must be exactly one reader
/// per connection.
pub struct FrameReader<T> {
    inner: T,
    decryptor: Decryptor,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T, decryptor: Decryptor) -> Self {
        Self::with_config(inner, decryptor, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, mut decryptor: Decryptor, config: FrameConfig) -> Self {
        decryptor.set_max_payload_size(config.payload_limit());
        Self {
            inner,
            decryptor,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. Any
    /// error is terminal for this reader.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decryptor.decode(&mut self.buf)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Next receive-direction nonce.
    pub fn next_nonce(&self) -> u32 {
        self.decryptor.next_nonce()
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<ApStream> {
    /// Create a frame reader for `ApStream` and apply read timeout from config.
    pub fn with_config_ap(inner: ApStream, decryptor: Decryptor, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, decryptor, config))
    }
}

pub(crate) fn transport_to_frame_error(err: spotwire_transport::TransportError) -> FrameError {
    match err {
        spotwire_transport::TransportError::Io(io) => FrameError::Io(io),
        spotwire_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
