//! Mercury messaging over an encrypted access-point connection.
//!
//! One [`Session`] owns one connection: a receive loop that is the only
//! reader, a [`SequentialDispatcher`] that is the only writer, and a
//! [`MercuryMultiplexer`] that correlates requests with responses and routes
//! pushes to subscribers by longest URI prefix.

pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod multiplexer;
pub mod proto;
mod receiver;
pub mod session;

pub use config::SessionConfig;
pub use connector::connect;
pub use dispatcher::{
    DispatchError, DispatcherConfig, SequentialDispatcher, ShutdownPolicy, TaskError, TaskHandle,
};
pub use error::{MercuryError, Result};
pub use message::{
    encode_sequence_id, MercuryMethod, MercuryPacket, MercuryRequest, MercuryResponse, FLAG_FINAL,
    FLAG_PARTIAL,
};
pub use multiplexer::{
    MercuryMultiplexer, Outbound, ResponseHandle, SubscriptionStream, DEFAULT_PUSH_TIMEOUT,
};
pub use session::{Session, SessionKeys};
