//! The single reader of the connection.

use std::io::ErrorKind;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use spotwire_frame::command::{command_name, is_mercury, COUNTRY_CODE, PING, PONG, PONG_ACK};
use spotwire_frame::{Frame, FrameError, FrameReader};
use spotwire_transport::ApStream;
use tracing::{debug, info, trace, warn};

use crate::error::MercuryError;
use crate::multiplexer::MercuryMultiplexer;

pub(crate) type CountryCell = Arc<Mutex<Option<String>>>;

/// Pulls frames off the stream until it fails, feeding Mercury frames to the
/// multiplexer and answering keepalives.
pub(crate) struct ReceiveLoop {
    reader: FrameReader<ApStream>,
    mux: MercuryMultiplexer,
    country: CountryCell,
}

impl ReceiveLoop {
    pub(crate) fn new(
        reader: FrameReader<ApStream>,
        mux: MercuryMultiplexer,
        country: CountryCell,
    ) -> Self {
        Self {
            reader,
            mux,
            country,
        }
    }

    pub(crate) fn spawn(self, name: &str) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        loop {
            match self.reader.read_frame() {
                Ok(frame) => self.handle(frame),
                // A configured read timeout only bounds each blocking read;
                // the decrypt state is untouched, so keep going unless closed.
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    if self.mux.is_closed() {
                        break;
                    }
                }
                Err(err) => {
                    let err = MercuryError::from(err);
                    if self.mux.is_closed() {
                        debug!(error = %err, "receive loop stopped after close");
                    } else {
                        warn!(error = %err, "receive loop terminated, aborting connection");
                    }
                    self.mux.abort(err);
                    break;
                }
            }
        }
        debug!(recv_nonce = self.reader.next_nonce(), "receive loop exited");
    }

    fn handle(&self, frame: Frame) {
        match frame.command {
            PING => {
                trace!(len = frame.payload.len(), "ping");
                if let Err(err) = self.mux.send_packet(PONG, frame.payload) {
                    debug!(error = %err, "could not queue pong");
                }
            }
            PONG_ACK => trace!("pong acknowledged"),
            COUNTRY_CODE => {
                let country = String::from_utf8_lossy(&frame.payload).into_owned();
                info!(country = %country, "country code received");
                *self.country.lock().unwrap_or_else(PoisonError::into_inner) = Some(country);
            }
            command if is_mercury(command) => self.mux.route(command, frame.payload),
            other => debug!(
                command = command_name(other),
                code = other,
                len = frame.payload.len(),
                "ignoring packet"
            ),
        }
    }
}
