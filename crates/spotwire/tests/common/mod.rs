#![allow(dead_code)]

use std::io::Write;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender};
use prost::Message;
use spotwire::frame::command::{
    COUNTRY_CODE, MERCURY_EVENT, MERCURY_REQ, MERCURY_SUB, MERCURY_UNSUB, PING, PONG,
};
use spotwire::frame::{CipherSession, FrameChannel, FrameConfig};
use spotwire::mercury::proto::{Header, Subscription};
use spotwire::mercury::{MercuryPacket, FLAG_FINAL};
use spotwire::transport::ApStream;

pub const CLIENT_SEND_KEY: &[u8] = b"integration-client-to-server-key";
pub const CLIENT_RECV_KEY: &[u8] = b"integration-server-to-client-key";

pub const PING_PAYLOAD: &[u8] = &[0x00, 0x00, 0x00, 0x2a];

/// What the fake access point observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Pong(Bytes),
    Request { method: String, uri: String },
}

pub struct FakeAccessPoint {
    pub seen: Receiver<Seen>,
    handle: JoinHandle<()>,
}

impl FakeAccessPoint {
    /// Serve one connection until the client goes away.
    ///
    /// On start it announces country `SE` and sends one ping. Requests to
    /// `hm://echo/...` are answered over three frames echoing the request
    /// parts; `hm://missing...` gets 404; SUB is acknowledged and followed
    /// by one push under the prefix.
    pub fn spawn(stream: ApStream) -> Self {
        let (tx, seen) = crossbeam::channel::unbounded();
        let handle = thread::spawn(move || serve(stream, tx));
        Self { seen, handle }
    }

    pub fn join(self) {
        self.handle.join().expect("fake access point panicked");
    }
}

fn serve(stream: ApStream, seen: Sender<Seen>) {
    let mut channel = FrameChannel::open(
        CipherSession::new(CLIENT_RECV_KEY, CLIENT_SEND_KEY),
        stream,
        FrameConfig::default(),
    )
    .expect("fake access point channel");

    channel.send(COUNTRY_CODE, b"SE").expect("country");
    channel.send(PING, PING_PAYLOAD).expect("ping");

    while let Ok(frame) = channel.receive() {
        match frame.command {
            PONG => {
                let _ = seen.send(Seen::Pong(frame.payload));
            }
            MERCURY_REQ | MERCURY_SUB | MERCURY_UNSUB => {
                let packet = MercuryPacket::decode(frame.payload).expect("request packet");
                let header = Header::decode(packet.parts[0].clone()).expect("request header");
                let uri = header.uri.clone().unwrap_or_default();
                let method = header.method.clone().unwrap_or_default();
                let _ = seen.send(Seen::Request {
                    method: method.clone(),
                    uri: uri.clone(),
                });

                for (command, payload) in answer(frame.command, &packet, &uri) {
                    if channel.send(command, &payload).is_err() {
                        return;
                    }
                }
            }
            _ => {}
        }
    }
}

fn answer(command: u8, request: &MercuryPacket, uri: &str) -> Vec<(u8, Bytes)> {
    let seq = &request.sequence;
    match command {
        MERCURY_REQ if uri.starts_with("hm://echo/") => {
            let mut frames = vec![(command, packet(seq, false, vec![header(uri, 200)]))];
            for part in &request.parts[1..] {
                frames.push((command, packet(seq, false, vec![part.clone()])));
            }
            frames.push((command, packet(seq, true, vec![])));
            frames
        }
        MERCURY_REQ if uri.starts_with("hm://missing") => {
            vec![(command, packet(seq, true, vec![header(uri, 404)]))]
        }
        MERCURY_REQ => vec![(command, packet(seq, true, vec![header(uri, 200)]))],
        MERCURY_SUB => {
            let ack = Subscription {
                uri: Some(format!("{uri}extra/")),
                expiry: Some(300),
                status_code: Some(200),
            };
            vec![
                (
                    command,
                    packet(
                        seq,
                        true,
                        vec![header(uri, 200), Bytes::from(ack.encode_to_vec())],
                    ),
                ),
                (
                    MERCURY_EVENT,
                    packet(
                        &[0xee],
                        true,
                        vec![header(&format!("{uri}item"), 0), Bytes::from_static(b"pushed")],
                    ),
                ),
            ]
        }
        _ => vec![(command, packet(seq, true, vec![header(uri, 200)]))],
    }
}

pub fn header(uri: &str, status: i32) -> Bytes {
    Bytes::from(
        Header {
            uri: Some(uri.to_string()),
            status_code: Some(status),
            ..Header::default()
        }
        .encode_to_vec(),
    )
}

pub fn packet(sequence: &[u8], final_frame: bool, parts: Vec<Bytes>) -> Bytes {
    MercuryPacket {
        sequence: sequence.to_vec(),
        flags: if final_frame { FLAG_FINAL } else { 0 },
        parts,
    }
    .encode()
    .expect("encodable packet")
}

/// Write raw bytes, bypassing framing.
pub fn write_raw(stream: &mut ApStream, bytes: &[u8]) {
    stream.write_all(bytes).expect("raw write");
}
