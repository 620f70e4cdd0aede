//! Access-point byte transport.
//!
//! The lowest layer of spotwire. It knows nothing about ciphers or Mercury;
//! it hands the layers above a connected [`ApStream`] that can be cloned into
//! independent read and write halves and shut down from any thread.
//!
//! - [`ApStream`]: a connected stream (TCP, or a Unix socket pair in tests)
//! - [`AccessPointResolver`]: injectable source of candidate `host:port` addresses
//! - [`connect_any`]: tries candidates in order and falls back on failure

pub mod error;
pub mod resolver;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use resolver::{connect_any, AccessPointResolver, StaticResolver, FALLBACK_ACCESS_POINT};
pub use stream::ApStream;
pub use tcp::{ConnectConfig, TcpConnector};
