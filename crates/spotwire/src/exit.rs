use std::fmt;
use std::io;

use spotwire_mercury::MercuryError;
use spotwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    }
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    let code = match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => io_code(source.kind()),
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn mercury_error(context: &str, err: MercuryError) -> CliError {
    match err {
        MercuryError::Connect(inner) => transport_error(context, &inner),
        MercuryError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        MercuryError::Transport(_) | MercuryError::ConnectionClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        MercuryError::Authentication(_)
        | MercuryError::Malformed(_)
        | MercuryError::Protocol(_)
        | MercuryError::Encode(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        MercuryError::Status { .. } | MercuryError::Rejected => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        MercuryError::Spawn(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}
