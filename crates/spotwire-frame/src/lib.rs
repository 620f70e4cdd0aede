//! Encrypted, length-prefixed framing for the access-point connection.
//!
//! Every frame on the wire is:
//! - a 1-byte command
//! - a 2-byte big-endian payload length
//! - the payload
//!
//! encrypted as one unit with the direction's Shannon cipher, re-nonced per
//! frame with a 32-bit counter, followed by a 4-byte authentication tag.
//! No partial reads, no buffer management in user code.

#[cfg(feature = "async")]
pub mod ap_codec;
pub mod channel;
pub mod cipher;
pub mod codec;
pub mod command;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use ap_codec::ApCodec;
pub use channel::FrameChannel;
pub use cipher::{CipherSession, Decryptor, Encryptor};
pub use codec::{Frame, FrameConfig, HEADER_SIZE, MAC_SIZE, MAX_PAYLOAD};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::{FrameWriter, PacketSink};
