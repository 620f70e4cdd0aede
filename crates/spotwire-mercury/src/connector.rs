use spotwire_transport::{connect_any, AccessPointResolver, TcpConnector};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::{Session, SessionKeys};

/// Resolve access points, connect to the first that answers and open a
/// session on it.
///
/// Candidates are tried once each, in resolver order. When every candidate
/// fails the error is [`MercuryError::Connect`](crate::MercuryError::Connect)
/// wrapping `TransportError::Exhausted`.
pub fn connect(
    resolver: &dyn AccessPointResolver,
    keys: &SessionKeys,
    config: SessionConfig,
) -> Result<Session> {
    let connector = TcpConnector::new(config.connect.clone());
    let (stream, addr) = connect_any(resolver, &connector)?;
    info!(addr = %addr, "access point connected");
    Session::open(&keys.send, &keys.recv, stream, config)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::Arc;

    use spotwire_transport::{StaticResolver, TransportError};

    use super::*;
    use crate::error::MercuryError;

    fn unused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[test]
    fn exhausted_candidates_surface_transport_error() {
        let resolver = StaticResolver::new([unused_addr(), unused_addr()]).without_fallback();
        let keys = SessionKeys::new(b"a".to_vec(), b"b".to_vec());

        let err = connect(&resolver, &keys, SessionConfig::default()).unwrap_err();
        match err {
            MercuryError::Connect(inner) => match Arc::try_unwrap(inner) {
                Ok(TransportError::Exhausted { attempts }) => assert_eq!(attempts.len(), 2),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_a_live_candidate() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let live = listener.local_addr().unwrap().to_string();
        let resolver = StaticResolver::new([unused_addr(), live]).without_fallback();
        let keys = SessionKeys::new(b"a".to_vec(), b"b".to_vec());

        let accept = std::thread::spawn(move || listener.accept().map(|(s, _)| s));
        let session = connect(&resolver, &keys, SessionConfig::default()).unwrap();
        let _server_side = accept.join().unwrap().unwrap();

        assert!(session.is_open());
        session.close();
    }
}
