use std::sync::Arc;
use std::time::Duration;

use spotwire_frame::FrameError;
use spotwire_transport::TransportError;

use crate::dispatcher::DispatchError;

/// Errors surfaced by Mercury sessions.
///
/// `Clone` so that one session-ending error can be delivered to every
/// outstanding request handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MercuryError {
    /// An inbound frame failed tag verification.
    #[error("frame authentication failed: {0}")]
    Authentication(String),

    /// The frame stream is no longer parseable.
    #[error("malformed frame stream: {0}")]
    Malformed(String),

    /// A single Mercury message could not be interpreted.
    #[error("mercury protocol error: {0}")]
    Protocol(String),

    /// The underlying stream failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    Connect(Arc<TransportError>),

    /// The session is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived before the request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The outbound dispatcher no longer accepts work.
    #[error("request rejected: session is shutting down")]
    Rejected,

    /// The server answered with an error status.
    #[error("status {code} for {uri}")]
    Status { code: i32, uri: String },

    /// The request could not be encoded into a frame.
    #[error("cannot encode request: {0}")]
    Encode(String),

    /// A session thread could not be started.
    #[error("failed to start session worker: {0}")]
    Spawn(String),
}

impl MercuryError {
    /// Whether this error ends the whole session rather than one request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MercuryError::Authentication(_)
                | MercuryError::Malformed(_)
                | MercuryError::Transport(_)
                | MercuryError::Connect(_)
                | MercuryError::ConnectionClosed
                | MercuryError::Spawn(_)
        )
    }
}

impl From<FrameError> for MercuryError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Authentication { .. } => MercuryError::Authentication(err.to_string()),
            FrameError::Malformed(_) | FrameError::Poisoned => {
                MercuryError::Malformed(err.to_string())
            }
            FrameError::PayloadTooLarge { .. } => MercuryError::Encode(err.to_string()),
            FrameError::NonceExhausted | FrameError::Io(_) => {
                MercuryError::Transport(err.to_string())
            }
            FrameError::ConnectionClosed => MercuryError::ConnectionClosed,
        }
    }
}

impl From<TransportError> for MercuryError {
    fn from(err: TransportError) -> Self {
        MercuryError::Connect(Arc::new(err))
    }
}

impl From<DispatchError> for MercuryError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Rejected => MercuryError::Rejected,
            DispatchError::Spawn(reason) => MercuryError::Spawn(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, MercuryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_classify() {
        let auth: MercuryError = FrameError::Authentication { nonce: 3 }.into();
        assert!(matches!(auth, MercuryError::Authentication(_)));
        assert!(auth.is_fatal());

        let too_large: MercuryError = FrameError::PayloadTooLarge {
            size: 70_000,
            max: 65_535,
        }
        .into();
        assert!(matches!(too_large, MercuryError::Encode(_)));
        assert!(!too_large.is_fatal());

        let closed: MercuryError = FrameError::ConnectionClosed.into();
        assert!(matches!(closed, MercuryError::ConnectionClosed));
    }

    #[test]
    fn request_local_errors_are_not_fatal() {
        assert!(!MercuryError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!MercuryError::Protocol("bad header".into()).is_fatal());
        assert!(!MercuryError::Status {
            code: 404,
            uri: "hm://x".into()
        }
        .is_fatal());
        assert!(!MercuryError::Rejected.is_fatal());
    }

    #[test]
    fn exhausted_connect_keeps_transport_error() {
        let err: MercuryError = TransportError::Exhausted {
            attempts: vec!["a:1".into()],
        }
        .into();
        match err {
            MercuryError::Connect(inner) => {
                assert!(matches!(*inner, TransportError::Exhausted { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errors_are_cloneable_for_fan_out() {
        let err = MercuryError::Transport("reset".into());
        let copies: Vec<_> = (0..3).map(|_| err.clone()).collect();
        assert!(copies.iter().all(|e| e.to_string() == "transport error: reset"));
    }
}
