/// Errors that can occur during frame encryption, decryption and I/O.
///
/// Everything except [`FrameError::PayloadTooLarge`] on the send path ends
/// the channel: the cipher state can no longer be trusted to line up with
/// the peer's.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured or wire maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The trailing authentication tag did not match the decrypted frame.
    #[error("frame authentication failed (nonce {nonce})")]
    Authentication { nonce: u32 },

    /// A frame's structure or declared length is inconsistent.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The per-direction nonce counter cannot advance further.
    #[error("nonce space exhausted")]
    NonceExhausted,

    /// The receive cipher was used after a previous failure.
    #[error("receive cipher desynchronized by an earlier failure")]
    Poisoned,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error came from tag verification.
    pub fn is_authentication(&self) -> bool {
        matches!(self, FrameError::Authentication { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
