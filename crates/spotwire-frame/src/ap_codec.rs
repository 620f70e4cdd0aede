//! `tokio-util` codec over the same cipher halves as the blocking reader and
//! writer, for callers that drive the access-point stream from an async
//! runtime.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::cipher::{CipherSession, Decryptor, Encryptor};
use crate::codec::{Frame, FrameConfig};
use crate::error::FrameError;

/// Encrypting frame codec.
#[derive(Debug)]
pub struct ApCodec {
    encryptor: Encryptor,
    decryptor: Decryptor,
}

impl ApCodec {
    /// Build a codec owning both cipher directions.
    pub fn new(cipher: CipherSession) -> Self {
        Self::with_config(cipher, &FrameConfig::default())
    }

    /// Build a codec with an explicit inbound payload limit.
    pub fn with_config(cipher: CipherSession, config: &FrameConfig) -> Self {
        let (encryptor, mut decryptor) = cipher.split();
        decryptor.set_max_payload_size(config.payload_limit());
        Self {
            encryptor,
            decryptor,
        }
    }
}

impl Encoder<(u8, Bytes)> for ApCodec {
    type Error = FrameError;

    fn encode(&mut self, item: (u8, Bytes), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (command, payload) = item;
        self.encryptor.encode(command, &payload, dst)
    }
}

impl Decoder for ApCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decryptor.decode(src)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    use super::*;

    const KEY_A: &[u8] = b"async-codec-key-a";
    const KEY_B: &[u8] = b"async-codec-key-b";

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let mut client = Framed::new(left, ApCodec::new(CipherSession::new(KEY_A, KEY_B)));
        let mut server = Framed::new(right, ApCodec::new(CipherSession::new(KEY_B, KEY_A)));

        client
            .send((0xb2, Bytes::from_static(b"async hello")))
            .await
            .unwrap();
        client
            .send((0x49, Bytes::from_static(b"\x00\x00\x00\x01")))
            .await
            .unwrap();

        let first = server.next().await.unwrap().unwrap();
        let second = server.next().await.unwrap().unwrap();
        assert_eq!(first, Frame::new(0xb2, Bytes::from_static(b"async hello")));
        assert_eq!(second.command, 0x49);
    }

    #[tokio::test]
    async fn tampered_frame_is_an_error() {
        let mut codec = ApCodec::new(CipherSession::new(KEY_A, KEY_B));
        let mut peer = ApCodec::new(CipherSession::new(KEY_B, KEY_A));

        let mut wire = BytesMut::new();
        codec
            .encode((1, Bytes::from_static(b"payload")), &mut wire)
            .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let err = peer.decode(&mut wire).unwrap_err();
        assert!(err.is_authentication());
    }
}
