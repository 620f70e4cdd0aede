use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{RecvTimeoutError, Sender};
use spotwire_frame::{CipherSession, FrameChannel, PacketSink};
use spotwire_transport::ApStream;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::dispatcher::{DispatcherConfig, SequentialDispatcher};
use crate::error::{MercuryError, Result};
use crate::message::{MercuryMethod, MercuryRequest, MercuryResponse};
use crate::multiplexer::{MercuryMultiplexer, SubscriptionStream};
use crate::receiver::{CountryCell, ReceiveLoop};

/// The two already-derived symmetric keys for one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub send: Vec<u8>,
    pub recv: Vec<u8>,
}

impl SessionKeys {
    pub fn new(send: impl Into<Vec<u8>>, recv: impl Into<Vec<u8>>) -> Self {
        Self {
            send: send.into(),
            recv: recv.into(),
        }
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("send", &format_args!("<redacted:{} bytes>", self.send.len()))
            .field("recv", &format_args!("<redacted:{} bytes>", self.recv.len()))
            .finish()
    }
}

/// A live Mercury session over one access-point connection.
///
/// Owns three threads: the receive loop (sole reader), the dispatcher
/// worker (sole writer) and the timeout sweeper. All methods take `&self`,
/// so a session can be shared between threads behind an `Arc`.
pub struct Session {
    mux: MercuryMultiplexer,
    stream: ApStream,
    country: CountryCell,
    config: SessionConfig,
    closed: AtomicBool,
    receiver: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl Session {
    /// Start a session on a connected stream with the given keys.
    pub fn open(
        send_key: &[u8],
        recv_key: &[u8],
        stream: ApStream,
        config: SessionConfig,
    ) -> Result<Self> {
        let control = stream.try_clone().map_err(MercuryError::from)?;
        let channel = FrameChannel::open(
            CipherSession::new(send_key, recv_key),
            stream,
            config.frame.clone(),
        )?;
        let (reader, writer) = channel.split();

        let sink: Box<dyn PacketSink> = Box::new(writer);
        let outbound = SequentialDispatcher::new(
            sink,
            DispatcherConfig {
                thread_name: "spotwire-dispatch".to_string(),
                shutdown_policy: config.shutdown_policy,
            },
        )?;
        let mux = MercuryMultiplexer::new(Arc::new(outbound))
            .with_transport(control.try_clone().map_err(MercuryError::from)?)
            .with_push_timeout(config.push_timeout);
        let country: CountryCell = Arc::default();

        let receiver = ReceiveLoop::new(reader, mux.clone(), Arc::clone(&country))
            .spawn("spotwire-recv")
            .map_err(|err| MercuryError::Spawn(err.to_string()))?;
        let sweeper = match spawn_sweeper(mux.clone(), config.sweep_interval) {
            Ok(sweeper) => sweeper,
            Err(err) => {
                mux.close(MercuryError::ConnectionClosed);
                let _ = control.shutdown();
                let _ = receiver.join();
                return Err(err);
            }
        };

        info!(peer = ?control.peer_addr(), "mercury session opened");

        Ok(Self {
            mux,
            stream: control,
            country,
            config,
            closed: AtomicBool::new(false),
            receiver: Mutex::new(Some(receiver)),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Send one request and block for its final response.
    pub fn request(
        &self,
        method: MercuryMethod,
        uri: &str,
        parts: Vec<Bytes>,
        timeout: Duration,
    ) -> Result<MercuryResponse> {
        let mut request = MercuryRequest::new(method, uri);
        request.payload = parts;
        self.execute(request, timeout)
    }

    /// Send a fully built request and block for its final response.
    pub fn execute(&self, request: MercuryRequest, timeout: Duration) -> Result<MercuryResponse> {
        self.mux.send_request(request, timeout)?.wait()
    }

    /// GET with the configured default timeout.
    pub fn get(&self, uri: &str) -> Result<MercuryResponse> {
        self.execute(MercuryRequest::get(uri), self.config.request_timeout)
    }

    /// Subscribe to pushes under `uri_prefix`.
    ///
    /// Blocks until the server acknowledges. An error status (or any
    /// failure) removes the listener again.
    pub fn subscribe(&self, uri_prefix: &str) -> Result<SubscriptionStream> {
        let (stream, ack) = self.mux.subscribe(uri_prefix, self.config.subscribe_timeout)?;
        match ack.wait().and_then(MercuryResponse::error_for_status) {
            Ok(_) => {
                debug!(prefix = uri_prefix, "subscribed");
                Ok(stream)
            }
            Err(err) => {
                self.mux.remove_listener(stream.id());
                Err(err)
            }
        }
    }

    /// Stop delivering pushes for `uri_prefix` and tell the server.
    pub fn unsubscribe(&self, uri_prefix: &str) -> Result<()> {
        self.mux
            .unsubscribe(uri_prefix, self.config.subscribe_timeout)?
            .wait()?
            .error_for_status()?;
        Ok(())
    }

    /// Country code announced by the access point, once received.
    pub fn country(&self) -> Option<String> {
        self.country
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Why the session ended, if it has.
    pub fn close_reason(&self) -> Option<MercuryError> {
        self.mux.close_reason()
    }

    /// Whether the session still accepts requests.
    pub fn is_open(&self) -> bool {
        !self.mux.is_closed()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Shut the session down. Idempotent.
    ///
    /// Outstanding requests fail with [`MercuryError::ConnectionClosed`],
    /// queued writes are drained or rejected per the shutdown policy, and
    /// the stream is shut down to unblock the receive loop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.mux.close(MercuryError::ConnectionClosed);
        self.mux.outbound().join();

        if let Some((stop, handle)) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            drop(stop);
            let _ = handle.join();
        }

        if let Err(err) = self.stream.shutdown() {
            debug!(error = %err, "stream shutdown failed");
        }
        if let Some(handle) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("receive loop panicked");
            }
        }

        info!("mercury session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("stream", &self.stream)
            .field("mux", &self.mux)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

fn spawn_sweeper(
    mux: MercuryMultiplexer,
    interval: Duration,
) -> Result<(Sender<()>, JoinHandle<()>)> {
    let (stop, stopped) = crossbeam::channel::bounded::<()>(0);
    let handle = thread::Builder::new()
        .name("spotwire-sweep".to_string())
        .spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) if mux.is_closed() => break,
                Err(RecvTimeoutError::Timeout) => {
                    let expired = mux.sweep(Instant::now());
                    if expired > 0 {
                        debug!(expired, "swept expired requests");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .map_err(|err| MercuryError::Spawn(err.to_string()))?;
    Ok((stop, handle))
}
