use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::ApStream;

/// Connection settings for reaching an access point.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Timeout for each individual TCP connect attempt.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm on the connected socket.
    pub nodelay: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            nodelay: true,
        }
    }
}

/// TCP transport to an access point.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: ConnectConfig,
}

impl TcpConnector {
    /// Create a connector with explicit settings.
    pub fn new(config: ConnectConfig) -> Self {
        Self { config }
    }

    /// Connection settings in use.
    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Connect to a single `host:port` candidate (blocking).
    ///
    /// Every socket address the name resolves to is tried in order before
    /// the candidate is reported as failed.
    pub fn connect(&self, addr: &str) -> Result<ApStream> {
        let resolved = resolve_socket_addrs(addr)?;

        let mut last_err = None;
        for socket_addr in resolved {
            match TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(self.config.nodelay)?;
                    info!(addr, %socket_addr, "connected to access point");
                    return Ok(ApStream::from_tcp(stream));
                }
                Err(err) => {
                    debug!(addr, %socket_addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            addr: addr.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "name resolved to no addresses",
                )
            }),
        })
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

fn resolve_socket_addrs(addr: &str) -> Result<Vec<SocketAddr>> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(TransportError::InvalidAddress {
            addr: addr.to_string(),
            reason: "missing ':port'".to_string(),
        });
    };
    if host.is_empty() {
        return Err(TransportError::InvalidAddress {
            addr: addr.to_string(),
            reason: "empty host".to_string(),
        });
    }
    if port.parse::<u16>().is_err() {
        return Err(TransportError::InvalidAddress {
            addr: addr.to_string(),
            reason: format!("invalid port '{port}'"),
        });
    }

    let resolved = addr
        .to_socket_addrs()
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    Ok(resolved.collect())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn connect_to_loopback_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let mut client = TcpConnector::default().connect(&addr).unwrap();
        client.write_all(b"hello").unwrap();

        assert_eq!(&server.join().unwrap(), b"hello");
        assert!(client.peer_addr().is_some());
    }

    #[test]
    fn refused_connection_reports_candidate() {
        // Bind then drop to get a port that is very likely closed.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let err = TcpConnector::default().connect(&addr).unwrap_err();
        assert!(matches!(err, TransportError::Connect { addr: ref a, .. } if *a == addr));
    }

    #[test]
    fn rejects_missing_port() {
        let err = TcpConnector::default().connect("localhost").unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
    }

    #[test]
    fn rejects_bad_port() {
        let err = TcpConnector::default().connect("localhost:http").unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
    }

    #[test]
    fn rejects_empty_host() {
        let err = TcpConnector::default().connect(":443").unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
    }
}
