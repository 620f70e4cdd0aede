use std::io::{Read, Write};

use spotwire_transport::ApStream;
use tracing::debug;

use crate::cipher::CipherSession;
use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::{transport_to_frame_error, FrameReader};
use crate::writer::FrameWriter;

/// An encrypted, framed, bidirectional channel over one byte stream.
///
/// Once `send` or `receive` fails the channel is closed and every later
/// call returns [`FrameError::ConnectionClosed`]. For concurrent use, split
/// it: the reader goes to the receive loop, the writer to the dispatcher.
pub struct FrameChannel<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    closed: bool,
}

impl<R: Read, W: Write> FrameChannel<R, W> {
    /// Assemble a channel from separate read and write handles.
    pub fn from_halves(cipher: CipherSession, read: R, write: W, config: FrameConfig) -> Self {
        let (encryptor, decryptor) = cipher.split();
        Self {
            reader: FrameReader::with_config(read, decryptor, config.clone()),
            writer: FrameWriter::with_config(write, encryptor, config),
            closed: false,
        }
    }

    /// Encrypt and write one frame as a single unit.
    pub fn send(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(FrameError::ConnectionClosed);
        }
        match self.writer.send(command, payload) {
            // Rejected before any byte or nonce was used.
            Err(err @ FrameError::PayloadTooLarge { .. }) => Err(err),
            Err(err) => {
                debug!(error = %err, "frame channel closed on send failure");
                self.closed = true;
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }

    /// Block until the next complete, verified frame arrives.
    pub fn receive(&mut self) -> Result<Frame> {
        if self.closed {
            return Err(FrameError::ConnectionClosed);
        }
        self.reader.read_frame().inspect_err(|err| {
            debug!(error = %err, "frame channel closed on receive failure");
            self.closed = true;
        })
    }

    /// Whether a previous failure closed the channel.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}

impl FrameChannel<ApStream, ApStream> {
    /// Wrap an access-point stream, cloning it into read and write handles
    /// and applying the configured timeouts.
    pub fn open(cipher: CipherSession, stream: ApStream, config: FrameConfig) -> Result<Self> {
        let read = stream.try_clone().map_err(transport_to_frame_error)?;
        let (encryptor, decryptor) = cipher.split();
        Ok(Self {
            reader: FrameReader::with_config_ap(read, decryptor, config.clone())?,
            writer: FrameWriter::with_config_ap(stream, encryptor, config)?,
            closed: false,
        })
    }
}
