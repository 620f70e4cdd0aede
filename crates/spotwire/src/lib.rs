//! Client for an encrypted access-point connection and the Mercury
//! request/response and pub/sub protocol carried over it.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams, TCP connect, access-point resolution
//! - [`frame`]: Shannon-encrypted, length-prefixed framing
//! - [`mercury`]: ordered dispatcher, multiplexer and sessions (behind the
//!   default `mercury` feature)

/// Re-export transport types.
pub mod transport {
    pub use spotwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use spotwire_frame::*;
}

/// Re-export Mercury session types (requires `mercury` feature).
#[cfg(feature = "mercury")]
pub mod mercury {
    pub use spotwire_mercury::*;
}
