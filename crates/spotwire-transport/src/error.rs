/// Errors that can occur while reaching or driving an access-point stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to a candidate address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The resolver could not produce candidate addresses.
    #[error("access point resolution failed: {0}")]
    Resolve(String),

    /// Every resolved candidate was tried and none accepted a connection.
    #[error("no access point reachable ({} candidates tried)", attempts.len())]
    Exhausted { attempts: Vec<String> },

    /// A candidate was not a usable `host:port` string.
    #[error("invalid access point address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
