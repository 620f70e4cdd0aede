//! Request correlation and push routing.
//!
//! All correlation state lives in one [`Tables`] value behind one mutex: the
//! pending-request map, partially assembled pushes and the subscription
//! list. Response assembly, the timeout sweep and session close all go
//! through that lock, so exactly one of them resolves any given request.
//!
//! A fatal error (from the receive loop or a failed write) aborts the whole
//! connection: every pending request fails, the outbound queue closes and the
//! transport is shut down.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use prost::Message;
use spotwire_frame::command::{
    command_name, MERCURY_EVENT, MERCURY_REQ, MERCURY_SUB, MERCURY_UNSUB,
};
use spotwire_frame::PacketSink;
use spotwire_transport::ApStream;
use tracing::{debug, trace, warn};

use crate::dispatcher::SequentialDispatcher;
use crate::error::{MercuryError, Result};
use crate::message::{
    encode_sequence_id, MercuryMethod, MercuryPacket, MercuryRequest, MercuryResponse,
};
use crate::proto::Subscription;

/// Dispatcher that owns the write half of the connection.
pub type Outbound = SequentialDispatcher<Box<dyn PacketSink>>;

/// How long a multi-frame push may wait for its next frame.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

struct Pending {
    method: MercuryMethod,
    uri: String,
    deadline: Instant,
    timeout: Duration,
    parts: Vec<Bytes>,
    respond: Sender<Result<MercuryResponse>>,
    /// Set for SUB requests: acknowledged URIs are registered to this
    /// listener id, if it still exists.
    listener: Option<u64>,
}

struct PartialPush {
    parts: Vec<Bytes>,
    deadline: Instant,
}

struct Listener {
    id: u64,
    prefix: String,
    sender: Sender<MercuryResponse>,
}

#[derive(Default)]
struct Tables {
    next_sequence: u64,
    next_listener: u64,
    pending: HashMap<Vec<u8>, Pending>,
    partial_pushes: HashMap<Vec<u8>, PartialPush>,
    listeners: Vec<Listener>,
    closed: Option<MercuryError>,
}

impl Tables {
    fn ensure_open(&self) -> Result<()> {
        match &self.closed {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn add_listener(&mut self, prefix: String, sender: Sender<MercuryResponse>) -> u64 {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push(Listener { id, prefix, sender });
        id
    }

    fn fail_all(&mut self, err: &MercuryError) -> usize {
        let failed = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.respond.send(Err(err.clone()));
        }
        self.partial_pushes.clear();
        self.listeners.clear();
        failed
    }
}

/// Correlates Mercury requests with responses and fans pushes out to
/// subscribers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MercuryMultiplexer {
    tables: Arc<Mutex<Tables>>,
    outbound: Arc<Outbound>,
    transport: Option<Arc<ApStream>>,
    push_timeout: Duration,
}

impl MercuryMultiplexer {
    pub fn new(outbound: Arc<Outbound>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            outbound,
            transport: None,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    /// Shut `control` down when the connection is aborted. Pass a clone of
    /// the stream the reader and writer use.
    pub fn with_transport(mut self, control: ApStream) -> Self {
        self.transport = Some(Arc::new(control));
        self
    }

    /// Idle time after which an incomplete multi-frame push is discarded.
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The dispatcher writing this multiplexer's frames.
    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    /// Allocate a sequence id, register the request and queue it for
    /// sending. The returned handle resolves on the final response frame,
    /// on timeout, or when the session fails.
    pub fn send_request(&self, request: MercuryRequest, timeout: Duration) -> Result<ResponseHandle> {
        self.dispatch(request, timeout, None)
    }

    /// Register a listener for `prefix` and send SUB for it.
    ///
    /// The stream is live immediately; the handle resolves with the
    /// server's acknowledgement.
    pub fn subscribe(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<(SubscriptionStream, ResponseHandle)> {
        let (sender, receiver) = crossbeam::channel::unbounded();
        let id = {
            let mut tables = self.lock();
            tables.ensure_open()?;
            tables.add_listener(prefix.to_string(), sender)
        };

        let request = MercuryRequest::new(MercuryMethod::Sub, prefix);
        match self.dispatch(request, timeout, Some(id)) {
            Ok(ack) => Ok((
                SubscriptionStream {
                    id,
                    prefix: prefix.to_string(),
                    receiver,
                },
                ack,
            )),
            Err(err) => {
                self.remove_listener(id);
                Err(err)
            }
        }
    }

    /// Drop every listener on exactly `prefix`, together with the URIs
    /// acknowledged for those listeners, and send UNSUB for it.
    pub fn unsubscribe(&self, prefix: &str, timeout: Duration) -> Result<ResponseHandle> {
        let removed = {
            let mut tables = self.lock();
            tables.ensure_open()?;
            let ids: Vec<u64> = tables
                .listeners
                .iter()
                .filter(|l| l.prefix == prefix)
                .map(|l| l.id)
                .collect();
            let before = tables.listeners.len();
            tables.listeners.retain(|l| !ids.contains(&l.id));
            before - tables.listeners.len()
        };
        debug!(prefix, removed, "unsubscribing");
        self.dispatch(MercuryRequest::new(MercuryMethod::Unsub, prefix), timeout, None)
    }

    /// Remove one listener (and any URIs registered to it).
    pub fn remove_listener(&self, id: u64) {
        self.lock().listeners.retain(|l| l.id != id);
    }

    fn dispatch(
        &self,
        request: MercuryRequest,
        timeout: Duration,
        listener: Option<u64>,
    ) -> Result<ResponseHandle> {
        let command = request.method.command();
        let (respond, outcome) = crossbeam::channel::bounded(1);

        let (sequence, payload) = {
            let mut tables = self.lock();
            tables.ensure_open()?;
            let sequence = encode_sequence_id(tables.next_sequence);
            tables.next_sequence += 1;

            let payload = request.to_packet(sequence.clone()).encode()?;
            tables.pending.insert(
                sequence.clone(),
                Pending {
                    method: request.method,
                    uri: request.uri.clone(),
                    deadline: Instant::now() + timeout,
                    timeout,
                    parts: Vec::new(),
                    respond,
                    listener,
                },
            );
            (sequence, payload)
        };

        trace!(
            method = %request.method,
            uri = %request.uri,
            seq = ?sequence,
            "mercury request queued"
        );

        let mux = self.clone();
        let task_sequence = sequence.clone();
        let submitted = self.outbound.submit(move |sink: &mut Box<dyn PacketSink>| {
            sink.send_packet(command, &payload).map_err(|err| {
                let err = MercuryError::from(err);
                mux.write_failed(&err, Some(task_sequence.as_slice()));
                err
            })
        });

        if let Err(err) = submitted {
            self.lock().pending.remove(&sequence);
            return Err(err.into());
        }

        Ok(ResponseHandle {
            sequence_id: sequence,
            outcome,
        })
    }

    /// Queue a raw frame behind any pending writes.
    pub fn send_packet(&self, command: u8, payload: Bytes) -> Result<()> {
        self.lock().ensure_open()?;
        let mux = self.clone();
        self.outbound.submit(move |sink: &mut Box<dyn PacketSink>| {
            sink.send_packet(command, &payload).map_err(|err| {
                let err = MercuryError::from(err);
                mux.write_failed(&err, None);
                err
            })
        })?;
        Ok(())
    }

    fn write_failed(&self, err: &MercuryError, sequence: Option<&[u8]>) {
        if err.is_fatal() {
            warn!(error = %err, "outbound write failed, aborting connection");
            self.abort(err.clone());
        } else if let Some(pending) = sequence.and_then(|seq| self.lock().pending.remove(seq)) {
            let _ = pending.respond.send(Err(err.clone()));
        }
    }

    /// Feed one inbound Mercury frame.
    pub fn route(&self, command: u8, payload: Bytes) {
        let packet = match MercuryPacket::decode(payload.clone()) {
            Ok(packet) => packet,
            Err(err) => {
                self.undecodable(command, &payload, err);
                return;
            }
        };

        match command {
            MERCURY_REQ | MERCURY_SUB | MERCURY_UNSUB => self.route_response(packet),
            MERCURY_EVENT => self.route_push(packet),
            other => debug!(command = command_name(other), "not a mercury command"),
        }
    }

    /// The frame authenticated, so the cipher is still in step: only the
    /// message the payload belongs to is affected.
    fn undecodable(&self, command: u8, payload: &[u8], err: MercuryError) {
        warn!(command = command_name(command), error = %err, "undecodable mercury payload");
        let Some(sequence) = MercuryPacket::peek_sequence(payload) else {
            return;
        };

        let mut tables = self.lock();
        match command {
            MERCURY_REQ | MERCURY_SUB | MERCURY_UNSUB => {
                if let Some(pending) = tables.pending.remove(sequence) {
                    debug!(method = %pending.method, uri = %pending.uri, "failing request on undecodable response");
                    let _ = pending.respond.send(Err(err));
                }
            }
            MERCURY_EVENT => {
                if tables.partial_pushes.remove(sequence).is_some() {
                    debug!(seq = ?sequence, "discarding partial push");
                }
            }
            _ => {}
        }
    }

    fn route_response(&self, packet: MercuryPacket) {
        let mut tables = self.lock();
        let is_final = packet.is_final();

        let Some(pending) = tables.pending.get_mut(&packet.sequence) else {
            debug!(seq = ?packet.sequence, "dropping response with no pending request");
            return;
        };
        pending.parts.extend(packet.parts);
        if !is_final {
            trace!(seq = ?packet.sequence, parts = pending.parts.len(), "awaiting more parts");
            return;
        }

        let Some(pending) = tables.pending.remove(&packet.sequence) else {
            return;
        };
        let result = MercuryResponse::from_parts(packet.sequence, pending.parts);

        if let (Ok(response), Some(id)) = (&result, pending.listener) {
            if response.status_code < 400 {
                register_acknowledged(&mut tables, id, &response.payload);
            }
        }

        if let Err(err) = &result {
            warn!(method = %pending.method, uri = %pending.uri, error = %err, "bad mercury response");
        }
        let _ = pending.respond.send(result);
    }

    fn route_push(&self, packet: MercuryPacket) {
        let mut tables = self.lock();

        let parts = if packet.is_final() {
            match tables.partial_pushes.remove(&packet.sequence) {
                Some(mut earlier) => {
                    earlier.parts.extend(packet.parts);
                    earlier.parts
                }
                None => packet.parts,
            }
        } else {
            let deadline = Instant::now() + self.push_timeout;
            let partial = tables
                .partial_pushes
                .entry(packet.sequence)
                .or_insert_with(|| PartialPush {
                    parts: Vec::new(),
                    deadline,
                });
            partial.parts.extend(packet.parts);
            partial.deadline = deadline;
            return;
        };

        let message = match MercuryResponse::from_parts(packet.sequence, parts) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping malformed push");
                return;
            }
        };

        loop {
            let best = tables
                .listeners
                .iter()
                .filter(|l| message.uri.starts_with(&l.prefix))
                .map(|l| l.prefix.len())
                .max();
            let Some(best) = best else {
                debug!(uri = %message.uri, "dropping unrouted push");
                return;
            };

            let mut delivered = 0usize;
            tables.listeners.retain(|l| {
                if l.prefix.len() != best || !message.uri.starts_with(&l.prefix) {
                    return true;
                }
                if l.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                    true
                } else {
                    trace!(prefix = %l.prefix, "pruning dropped listener");
                    false
                }
            });
            if delivered > 0 {
                trace!(uri = %message.uri, delivered, "push delivered");
                return;
            }
        }
    }

    /// Time out every request whose deadline is at or before `now`, and
    /// discard multi-frame pushes that stopped arriving. Returns the number
    /// of requests timed out.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut tables = self.lock();

        let before = tables.partial_pushes.len();
        tables.partial_pushes.retain(|_, p| p.deadline > now);
        let stale = before - tables.partial_pushes.len();
        if stale > 0 {
            debug!(stale, "discarded incomplete pushes");
        }

        let expired: Vec<Vec<u8>> = tables
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(seq, _)| seq.clone())
            .collect();

        for seq in &expired {
            if let Some(pending) = tables.pending.remove(seq) {
                debug!(method = %pending.method, uri = %pending.uri, timeout = ?pending.timeout, "mercury request timed out");
                let _ = pending.respond.send(Err(MercuryError::Timeout(pending.timeout)));
            }
        }
        expired.len()
    }

    /// Fail everything outstanding with `err` and refuse new work.
    /// The first error recorded wins.
    pub fn close(&self, err: MercuryError) {
        let mut tables = self.lock();
        if tables.closed.is_none() {
            tables.closed = Some(err.clone());
        }
        let failed = tables.fail_all(&err);
        if failed > 0 {
            debug!(failed, error = %err, "failed outstanding mercury requests");
        }
    }

    /// Abort the connection: fail everything with `err`, stop accepting
    /// writes and shut the transport down. Safe to call more than once and
    /// from the dispatcher worker.
    pub fn abort(&self, err: MercuryError) {
        self.close(err);
        self.outbound.close();
        if let Some(transport) = &self.transport {
            if let Err(err) = transport.shutdown() {
                debug!(error = %err, "transport shutdown failed");
            }
        }
    }

    /// Error that closed the multiplexer, if any.
    pub fn close_reason(&self) -> Option<MercuryError> {
        self.lock().closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

impl fmt::Debug for MercuryMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.lock();
        f.debug_struct("MercuryMultiplexer")
            .field("pending", &tables.pending.len())
            .field("listeners", &tables.listeners.len())
            .field("partial_pushes", &tables.partial_pushes.len())
            .field("closed", &tables.closed)
            .finish()
    }
}

fn register_acknowledged(tables: &mut Tables, id: u64, parts: &[Bytes]) {
    // Unsubscribed or pruned before the ack arrived.
    let Some(sender) = tables
        .listeners
        .iter()
        .find(|l| l.id == id)
        .map(|l| l.sender.clone())
    else {
        return;
    };

    for part in parts {
        match Subscription::decode(part.clone()) {
            Ok(Subscription { uri: Some(uri), .. }) => {
                let known = tables.listeners.iter().any(|l| l.id == id && l.prefix == uri);
                if !known {
                    trace!(uri = %uri, "registering acknowledged subscription");
                    tables.listeners.push(Listener {
                        id,
                        prefix: uri,
                        sender: sender.clone(),
                    });
                }
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "ignoring undecodable subscription ack part"),
        }
    }
}

/// Resolves with the final response to one request.
pub struct ResponseHandle {
    sequence_id: Vec<u8>,
    outcome: Receiver<Result<MercuryResponse>>,
}

impl ResponseHandle {
    pub fn sequence_id(&self) -> &[u8] {
        &self.sequence_id
    }

    /// Block until the request completes, fails or times out.
    pub fn wait(self) -> Result<MercuryResponse> {
        self.outcome
            .recv()
            .unwrap_or(Err(MercuryError::ConnectionClosed))
    }

    /// Block for at most `timeout`; `None` if still outstanding.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<MercuryResponse>> {
        match self.outcome.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(MercuryError::ConnectionClosed)),
        }
    }

    pub fn try_wait(&self) -> Option<Result<MercuryResponse>> {
        match self.outcome.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(MercuryError::ConnectionClosed)),
        }
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("sequence_id", &self.sequence_id)
            .finish()
    }
}

/// Push messages for one subscription. Ends when the session closes or the
/// prefix is unsubscribed.
#[derive(Debug)]
pub struct SubscriptionStream {
    id: u64,
    prefix: String,
    receiver: Receiver<MercuryResponse>,
}

impl SubscriptionStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Block for the next push; `None` once the subscription has ended.
    pub fn recv(&self) -> Option<MercuryResponse> {
        self.receiver.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MercuryResponse> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<MercuryResponse> {
        self.receiver.try_recv().ok()
    }
}

impl Iterator for SubscriptionStream {
    type Item = MercuryResponse;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use spotwire_frame::FrameError;

    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::message::{FLAG_FINAL, FLAG_PARTIAL};
    use crate::proto::Header;

    type Sent = Arc<Mutex<Vec<(u8, Bytes)>>>;

    struct RecordingSink {
        sent: Sent,
        fail_with: Option<fn() -> FrameError>,
        fail_command: Option<u8>,
    }

    impl PacketSink for RecordingSink {
        fn send_packet(&mut self, command: u8, payload: &[u8]) -> spotwire_frame::Result<()> {
            if let Some(make) = self.fail_with {
                if self.fail_command.is_none_or(|c| c == command) {
                    return Err(make());
                }
            }
            self.sent
                .lock()
                .unwrap()
                .push((command, Bytes::copy_from_slice(payload)));
            Ok(())
        }
    }

    fn recording_mux(
        fail_with: Option<fn() -> FrameError>,
        fail_command: Option<u8>,
    ) -> (MercuryMultiplexer, Sent) {
        let sent: Sent = Arc::default();
        let sink: Box<dyn PacketSink> = Box::new(RecordingSink {
            sent: Arc::clone(&sent),
            fail_with,
            fail_command,
        });
        let outbound = SequentialDispatcher::new(sink, DispatcherConfig::default()).unwrap();
        (MercuryMultiplexer::new(Arc::new(outbound)), sent)
    }

    fn mux_with(fail_with: Option<fn() -> FrameError>) -> (MercuryMultiplexer, Sent) {
        recording_mux(fail_with, None)
    }

    fn mux_failing_on(command: u8, fail_with: fn() -> FrameError) -> (MercuryMultiplexer, Sent) {
        recording_mux(Some(fail_with), Some(command))
    }

    fn mux() -> (MercuryMultiplexer, Sent) {
        mux_with(None)
    }

    fn flush(mux: &MercuryMultiplexer) {
        mux.outbound()
            .submit(|_: &mut Box<dyn PacketSink>| Ok::<_, ()>(()))
            .unwrap()
            .wait()
            .unwrap();
    }

    fn header_part(uri: &str, status: i32) -> Bytes {
        Bytes::from(
            Header {
                uri: Some(uri.to_string()),
                status_code: Some(status),
                ..Header::default()
            }
            .encode_to_vec(),
        )
    }

    fn payload(sequence: &[u8], final_frame: bool, parts: Vec<Bytes>) -> Bytes {
        payload_with_flags(sequence, if final_frame { FLAG_FINAL } else { 0 }, parts)
    }

    fn payload_with_flags(sequence: &[u8], flags: u8, parts: Vec<Bytes>) -> Bytes {
        MercuryPacket {
            sequence: sequence.to_vec(),
            flags,
            parts,
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn request_reaches_sink_with_header() {
        let (mux, sent) = mux();
        let handle = mux
            .send_request(MercuryRequest::get("hm://metadata/x"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(handle.sequence_id(), &[0x00]);
        flush(&mux);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, MERCURY_REQ);
        let packet = MercuryPacket::decode(sent[0].1.clone()).unwrap();
        assert_eq!(packet.sequence, vec![0x00]);
        let header = Header::decode(packet.parts[0].clone()).unwrap();
        assert_eq!(header.method.as_deref(), Some("GET"));
        assert_eq!(header.uri.as_deref(), Some("hm://metadata/x"));
    }

    #[test]
    fn concurrent_requests_get_distinct_ids() {
        let (mux, _sent) = mux();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let mux = mux.clone();
                thread::spawn(move || {
                    (0..64)
                        .map(|_| {
                            mux.send_request(MercuryRequest::get("hm://x"), Duration::from_secs(30))
                                .unwrap()
                                .sequence_id()
                                .to_vec()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<Vec<u8>> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(mux.pending_count(), total);
    }

    #[test]
    fn three_frame_response_completes_on_final_frame() {
        let (mux, _sent) = mux();
        let handle = mux
            .send_request(MercuryRequest::get("hm://big"), Duration::from_secs(5))
            .unwrap();
        let seq = handle.sequence_id().to_vec();

        mux.route(
            MERCURY_REQ,
            payload(&seq, false, vec![header_part("hm://big", 200), Bytes::from_static(b"one")]),
        );
        assert!(handle.try_wait().is_none());
        mux.route(MERCURY_REQ, payload(&seq, false, vec![Bytes::from_static(b"two")]));
        assert!(handle.try_wait().is_none());
        mux.route(MERCURY_REQ, payload(&seq, true, vec![Bytes::from_static(b"three")]));

        let response = handle.wait().unwrap();
        assert_eq!(response.status_code, 200);
        let parts: Vec<&[u8]> = response.payload.iter().map(|p| p.as_ref()).collect();
        assert_eq!(parts, vec![&b"one"[..], b"two", b"three"]);
        assert_eq!(mux.pending_count(), 0);
    }

    #[test]
    fn expired_request_times_out_and_late_response_is_dropped() {
        let (mux, _sent) = mux();
        let handle = mux
            .send_request(MercuryRequest::get("hm://slow"), Duration::ZERO)
            .unwrap();
        let seq = handle.sequence_id().to_vec();

        assert_eq!(mux.sweep(Instant::now()), 1);
        assert!(matches!(handle.wait(), Err(MercuryError::Timeout(d)) if d == Duration::ZERO));
        assert_eq!(mux.pending_count(), 0);

        mux.route(MERCURY_REQ, payload(&seq, true, vec![header_part("hm://slow", 200)]));
        assert_eq!(mux.pending_count(), 0);
        assert!(!mux.is_closed());
    }

    #[test]
    fn sweep_leaves_live_requests_alone() {
        let (mux, _sent) = mux();
        let handle = mux
            .send_request(MercuryRequest::get("hm://ok"), Duration::from_secs(60))
            .unwrap();
        assert_eq!(mux.sweep(Instant::now()), 0);
        assert!(handle.try_wait().is_none());
    }

    #[test]
    fn bad_header_fails_only_that_request() {
        let (mux, _sent) = mux();
        let bad = mux
            .send_request(MercuryRequest::get("hm://a"), Duration::from_secs(5))
            .unwrap();
        let good = mux
            .send_request(MercuryRequest::get("hm://b"), Duration::from_secs(5))
            .unwrap();

        mux.route(
            MERCURY_REQ,
            payload(bad.sequence_id(), true, vec![Bytes::from_static(&[0xff, 0xff])]),
        );
        mux.route(
            MERCURY_REQ,
            payload(good.sequence_id(), true, vec![header_part("hm://b", 200)]),
        );

        assert!(matches!(bad.wait(), Err(MercuryError::Protocol(_))));
        assert_eq!(good.wait().unwrap().uri, "hm://b");
        assert!(!mux.is_closed());
    }

    #[test]
    fn push_goes_to_longest_matching_prefix() {
        let (mux, _sent) = mux();
        let (short, _) = mux.subscribe("hm://pusher/", Duration::from_secs(5)).unwrap();
        let (long, _) = mux
            .subscribe("hm://pusher/v1/connections/", Duration::from_secs(5))
            .unwrap();

        mux.route(
            MERCURY_EVENT,
            payload(&[0x42], true, vec![header_part("hm://pusher/v1/connections/abc", 0)]),
        );
        mux.route(
            MERCURY_EVENT,
            payload(&[0x43], true, vec![header_part("hm://pusher/other", 0)]),
        );

        assert_eq!(long.try_recv().unwrap().uri, "hm://pusher/v1/connections/abc");
        assert!(long.try_recv().is_none());
        assert_eq!(short.try_recv().unwrap().uri, "hm://pusher/other");
        assert!(short.try_recv().is_none());
    }

    #[test]
    fn listeners_sharing_a_prefix_all_receive() {
        let (mux, _sent) = mux();
        let (a, _) = mux.subscribe("hm://x/", Duration::from_secs(5)).unwrap();
        let (b, _) = mux.subscribe("hm://x/", Duration::from_secs(5)).unwrap();

        mux.route(MERCURY_EVENT, payload(&[1], true, vec![header_part("hm://x/1", 0)]));
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
    }

    #[test]
    fn dropped_listener_is_pruned_and_shorter_prefix_takes_over() {
        let (mux, _sent) = mux();
        let (short, _) = mux.subscribe("hm://x/", Duration::from_secs(5)).unwrap();
        let (long, _) = mux.subscribe("hm://x/y/", Duration::from_secs(5)).unwrap();
        drop(long);

        mux.route(MERCURY_EVENT, payload(&[1], true, vec![header_part("hm://x/y/z", 0)]));
        assert_eq!(short.try_recv().unwrap().uri, "hm://x/y/z");
        assert_eq!(mux.listener_count(), 1);
    }

    #[test]
    fn unrouted_push_is_dropped() {
        let (mux, _sent) = mux();
        mux.route(MERCURY_EVENT, payload(&[1], true, vec![header_part("hm://nobody", 0)]));
        assert!(!mux.is_closed());
    }

    #[test]
    fn multi_frame_push_is_assembled() {
        let (mux, _sent) = mux();
        let (stream, _) = mux.subscribe("hm://feed/", Duration::from_secs(5)).unwrap();

        mux.route(
            MERCURY_EVENT,
            payload(&[9], false, vec![header_part("hm://feed/1", 0), Bytes::from_static(b"a")]),
        );
        assert!(stream.try_recv().is_none());
        mux.route(MERCURY_EVENT, payload(&[9], true, vec![Bytes::from_static(b"b")]));

        let message = stream.try_recv().unwrap();
        assert_eq!(message.payload, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[test]
    fn stale_response_is_not_a_push() {
        let (mux, _sent) = mux();
        let (stream, _) = mux.subscribe("hm://", Duration::from_secs(5)).unwrap();
        mux.route(MERCURY_REQ, payload(&[0x7f], true, vec![header_part("hm://stale", 200)]));
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn subscribe_ack_registers_returned_uris() {
        let (mux, sent) = mux();
        let (stream, ack) = mux.subscribe("hm://remote/user/", Duration::from_secs(5)).unwrap();
        flush(&mux);
        assert_eq!(sent.lock().unwrap()[0].0, MERCURY_SUB);

        let sub = Subscription {
            uri: Some("hm://remote/3/user/abc/".into()),
            expiry: Some(60),
            status_code: Some(200),
        };
        mux.route(
            MERCURY_SUB,
            payload(
                ack.sequence_id(),
                true,
                vec![header_part("hm://remote/user/", 200), Bytes::from(sub.encode_to_vec())],
            ),
        );
        ack.wait().unwrap();
        assert_eq!(mux.listener_count(), 2);

        mux.route(
            MERCURY_EVENT,
            payload(&[5], true, vec![header_part("hm://remote/3/user/abc/devices", 0)]),
        );
        assert_eq!(stream.try_recv().unwrap().uri, "hm://remote/3/user/abc/devices");
    }

    #[test]
    fn unsubscribe_removes_listeners_and_sends_unsub() {
        let (mux, sent) = mux();
        let (stream, _) = mux.subscribe("hm://x/", Duration::from_secs(5)).unwrap();
        mux.unsubscribe("hm://x/", Duration::from_secs(5)).unwrap();
        flush(&mux);

        assert_eq!(mux.listener_count(), 0);
        assert!(stream.recv().is_none());
        let commands: Vec<u8> = sent.lock().unwrap().iter().map(|(c, _)| *c).collect();
        assert_eq!(commands, vec![MERCURY_SUB, MERCURY_UNSUB]);
    }

    #[test]
    fn close_fails_pending_and_rejects_new_requests() {
        let (mux, _sent) = mux();
        let a = mux
            .send_request(MercuryRequest::get("hm://a"), Duration::from_secs(5))
            .unwrap();
        let (stream, _) = mux.subscribe("hm://s/", Duration::from_secs(5)).unwrap();

        mux.close(MercuryError::Authentication("bad tag".into()));
        mux.close(MercuryError::ConnectionClosed);

        assert!(matches!(a.wait(), Err(MercuryError::Authentication(_))));
        assert!(stream.recv().is_none());
        assert!(matches!(
            mux.send_request(MercuryRequest::get("hm://b"), Duration::from_secs(5)),
            Err(MercuryError::Authentication(_))
        ));
        assert!(matches!(mux.close_reason(), Some(MercuryError::Authentication(_))));
    }

    #[test]
    fn fatal_write_failure_fails_everything() {
        let (mux, _sent) = mux_with(Some(|| {
            FrameError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }));
        let handle = mux
            .send_request(MercuryRequest::get("hm://a"), Duration::from_secs(5))
            .unwrap();
        assert!(matches!(handle.wait(), Err(MercuryError::Transport(_))));
        assert!(mux.is_closed());
        assert!(mux.outbound().is_closed());
        assert!(matches!(
            mux.send_packet(0x49, Bytes::new()),
            Err(MercuryError::Transport(_))
        ));
    }

    #[test]
    fn fatal_raw_packet_write_aborts_too() {
        let (mux, _sent) = mux_failing_on(0x49, || FrameError::ConnectionClosed);
        let handle = mux
            .send_request(MercuryRequest::get("hm://a"), Duration::from_secs(30))
            .unwrap();
        flush(&mux);

        mux.send_packet(0x49, Bytes::from_static(b"pong")).unwrap();

        assert!(matches!(handle.wait(), Err(MercuryError::ConnectionClosed)));
        assert!(mux.outbound().is_closed());
    }

    #[cfg(unix)]
    #[test]
    fn abort_shuts_the_transport_down() {
        use std::io::Read;

        let (left, mut right) = ApStream::pair().unwrap();
        let (mux, _sent) = mux();
        let mux = mux.with_transport(left);
        let handle = mux
            .send_request(MercuryRequest::get("hm://a"), Duration::from_secs(30))
            .unwrap();

        mux.abort(MercuryError::Authentication("bad tag".into()));
        mux.abort(MercuryError::ConnectionClosed);

        assert!(matches!(handle.wait(), Err(MercuryError::Authentication(_))));
        assert!(mux.outbound().is_closed());
        right
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn oversized_request_fails_locally() {
        let (mux, _sent) = mux();
        let big = MercuryRequest::send("hm://big", Bytes::from(vec![0u8; 70_000]));
        assert!(matches!(
            mux.send_request(big, Duration::from_secs(5)),
            Err(MercuryError::Encode(_))
        ));
        assert!(!mux.is_closed());
        assert_eq!(mux.pending_count(), 0);
    }

    #[test]
    fn request_after_dispatcher_close_is_rejected() {
        let (mux, _sent) = mux();
        mux.outbound().close();
        assert!(matches!(
            mux.send_request(MercuryRequest::get("hm://a"), Duration::from_secs(5)),
            Err(MercuryError::Rejected)
        ));
        assert_eq!(mux.pending_count(), 0);
    }

    #[test]
    fn raw_packets_share_the_write_order() {
        let (mux, sent) = mux();
        mux.send_packet(0x49, Bytes::from_static(b"pong")).unwrap();
        mux.send_request(MercuryRequest::get("hm://a"), Duration::from_secs(5))
            .unwrap();
        flush(&mux);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], (0x49, Bytes::from_static(b"pong")));
        assert_eq!(sent[1].0, MERCURY_REQ);
    }

    #[test]
    fn unattributable_payload_is_ignored() {
        let (mux, _sent) = mux();
        mux.route(MERCURY_REQ, Bytes::from_static(&[0, 9]));
        assert!(!mux.is_closed());
    }

    #[test]
    fn undecodable_response_fails_its_request_at_once() {
        let (mux, _sent) = mux();
        let broken = mux
            .send_request(MercuryRequest::get("hm://a"), Duration::from_secs(30))
            .unwrap();
        let other = mux
            .send_request(MercuryRequest::get("hm://b"), Duration::from_secs(30))
            .unwrap();
        assert_eq!(broken.sequence_id(), &[0x00]);

        // seq 0x00, final, five parts announced, none present
        mux.route(MERCURY_REQ, Bytes::from_static(&[0, 1, 0, FLAG_FINAL, 0, 5]));

        assert!(matches!(
            broken.wait_timeout(Duration::from_secs(1)),
            Some(Err(MercuryError::Protocol(_)))
        ));
        assert!(other.try_wait().is_none());
        assert_eq!(mux.pending_count(), 1);
        assert!(!mux.is_closed());
    }

    #[test]
    fn undecodable_push_frame_discards_the_partial_push() {
        let (mux, _sent) = mux();
        let (stream, _) = mux.subscribe("hm://feed/", Duration::from_secs(5)).unwrap();

        mux.route(
            MERCURY_EVENT,
            payload(&[9], false, vec![header_part("hm://feed/1", 0), Bytes::from_static(b"a")]),
        );
        mux.route(MERCURY_EVENT, Bytes::from_static(&[0, 1, 9, FLAG_FINAL, 0, 2]));
        mux.route(MERCURY_EVENT, payload(&[9], true, vec![Bytes::from_static(b"b")]));

        // Only the last frame remains, and it has no header.
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn stalled_push_is_discarded_by_sweep() {
        let (mux, _sent) = mux();
        let mux = mux.with_push_timeout(Duration::ZERO);
        let (stream, _) = mux.subscribe("hm://feed/", Duration::from_secs(60)).unwrap();

        mux.route(
            MERCURY_EVENT,
            payload(&[9], false, vec![header_part("hm://feed/1", 0), Bytes::from_static(b"a")]),
        );
        assert_eq!(mux.sweep(Instant::now()), 0);
        assert!(format!("{mux:?}").contains("partial_pushes: 0"));

        mux.route(MERCURY_EVENT, payload(&[9], true, vec![Bytes::from_static(b"b")]));
        assert!(stream.try_recv().is_none());
        assert_eq!(mux.pending_count(), 1);
    }

    #[test]
    fn partial_flag_keeps_parts_as_framed() {
        let (mux, _sent) = mux();
        let handle = mux
            .send_request(MercuryRequest::get("hm://split"), Duration::from_secs(5))
            .unwrap();
        let seq = handle.sequence_id().to_vec();

        mux.route(
            MERCURY_REQ,
            payload_with_flags(
                &seq,
                FLAG_PARTIAL,
                vec![header_part("hm://split", 200), Bytes::from_static(b"ab")],
            ),
        );
        assert!(handle.try_wait().is_none());
        mux.route(
            MERCURY_REQ,
            payload_with_flags(&seq, FLAG_FINAL, vec![Bytes::from_static(b"cd")]),
        );

        let response = handle.wait().unwrap();
        assert_eq!(
            response.payload,
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]
        );
    }
}
