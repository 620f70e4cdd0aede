//! Access-point command bytes.
//!
//! Every frame starts with one of these. Only the keepalive, country-code and
//! Mercury commands are interpreted by spotwire; the rest are named for logs.

pub const SECRET_BLOCK: u8 = 0x02;
pub const PING: u8 = 0x04;
pub const STREAM_CHUNK: u8 = 0x08;
pub const STREAM_CHUNK_RES: u8 = 0x09;
pub const CHANNEL_ERROR: u8 = 0x0a;
pub const CHANNEL_ABORT: u8 = 0x0b;
pub const REQUEST_KEY: u8 = 0x0c;
pub const AES_KEY: u8 = 0x0d;
pub const AES_KEY_ERROR: u8 = 0x0e;
pub const IMAGE: u8 = 0x19;
pub const COUNTRY_CODE: u8 = 0x1b;
pub const PONG: u8 = 0x49;
pub const PONG_ACK: u8 = 0x4a;
pub const PAUSE: u8 = 0x4b;
pub const PRODUCT_INFO: u8 = 0x50;
pub const LEGACY_WELCOME: u8 = 0x69;
pub const LICENSE_VERSION: u8 = 0x76;
pub const LOGIN: u8 = 0xab;
pub const AP_WELCOME: u8 = 0xac;
pub const AUTH_FAILURE: u8 = 0xad;

/// Mercury request (GET and SEND) and its response.
pub const MERCURY_REQ: u8 = 0xb2;
/// Mercury subscribe and its acknowledgement.
pub const MERCURY_SUB: u8 = 0xb3;
/// Mercury unsubscribe and its acknowledgement.
pub const MERCURY_UNSUB: u8 = 0xb4;
/// Unsolicited Mercury push.
pub const MERCURY_EVENT: u8 = 0xb5;

/// Returns a human-readable name for a command byte.
pub fn command_name(command: u8) -> &'static str {
    match command {
        SECRET_BLOCK => "SECRET_BLOCK",
        PING => "PING",
        STREAM_CHUNK => "STREAM_CHUNK",
        STREAM_CHUNK_RES => "STREAM_CHUNK_RES",
        CHANNEL_ERROR => "CHANNEL_ERROR",
        CHANNEL_ABORT => "CHANNEL_ABORT",
        REQUEST_KEY => "REQUEST_KEY",
        AES_KEY => "AES_KEY",
        AES_KEY_ERROR => "AES_KEY_ERROR",
        IMAGE => "IMAGE",
        COUNTRY_CODE => "COUNTRY_CODE",
        PONG => "PONG",
        PONG_ACK => "PONG_ACK",
        PAUSE => "PAUSE",
        PRODUCT_INFO => "PRODUCT_INFO",
        LEGACY_WELCOME => "LEGACY_WELCOME",
        LICENSE_VERSION => "LICENSE_VERSION",
        LOGIN => "LOGIN",
        AP_WELCOME => "AP_WELCOME",
        AUTH_FAILURE => "AUTH_FAILURE",
        MERCURY_REQ => "MERCURY_REQ",
        MERCURY_SUB => "MERCURY_SUB",
        MERCURY_UNSUB => "MERCURY_UNSUB",
        MERCURY_EVENT => "MERCURY_EVENT",
        _ => "UNKNOWN",
    }
}

/// Returns true if the command carries a Mercury message.
pub fn is_mercury(command: u8) -> bool {
    (MERCURY_REQ..=MERCURY_EVENT).contains(&command)
}
