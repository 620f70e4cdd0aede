use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::stream::ApStream;
use crate::tcp::TcpConnector;

/// Access point used when a resolver has nothing better to offer.
pub const FALLBACK_ACCESS_POINT: &str = "ap.spotify.com:443";

/// Source of candidate access-point addresses, in preference order.
///
/// Implementations are constructed explicitly and passed to whoever connects;
/// there is no process-wide instance.
pub trait AccessPointResolver: Send + Sync {
    /// Ordered list of `host:port` candidates.
    fn resolve(&self) -> Result<Vec<String>>;
}

/// Resolver backed by a cached candidate list.
///
/// The cache can be replaced at runtime (for example after an out-of-band
/// lookup). When the cache is empty the resolver answers with
/// [`FALLBACK_ACCESS_POINT`] unless fallback was disabled.
#[derive(Debug)]
pub struct StaticResolver {
    candidates: Mutex<Vec<String>>,
    use_fallback: bool,
}

impl StaticResolver {
    /// Create a resolver with an initial candidate list.
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: Mutex::new(candidates.into_iter().map(Into::into).collect()),
            use_fallback: true,
        }
    }

    /// Disable the built-in fallback address.
    pub fn without_fallback(mut self) -> Self {
        self.use_fallback = false;
        self
    }

    /// Replace the cached candidate list.
    pub fn update<I, S>(&self, candidates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cached = self
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cached = candidates.into_iter().map(Into::into).collect();
        debug!(count = cached.len(), "access point cache updated");
    }
}

impl AccessPointResolver for StaticResolver {
    fn resolve(&self) -> Result<Vec<String>> {
        let cached = self
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !cached.is_empty() {
            return Ok(cached);
        }
        if self.use_fallback {
            return Ok(vec![FALLBACK_ACCESS_POINT.to_string()]);
        }
        Err(TransportError::Resolve(
            "no cached access points and fallback disabled".to_string(),
        ))
    }
}

/// Connect to the first reachable candidate.
///
/// Candidates are tried strictly in resolver order; a failed attempt moves on
/// to the next one. There is no retry loop: once the list is exhausted the
/// failure is surfaced to the caller.
pub fn connect_any(
    resolver: &dyn AccessPointResolver,
    connector: &TcpConnector,
) -> Result<(ApStream, String)> {
    let candidates = resolver.resolve()?;
    if candidates.is_empty() {
        return Err(TransportError::Resolve(
            "resolver returned no candidates".to_string(),
        ));
    }

    let mut attempts = Vec::with_capacity(candidates.len());
    for addr in candidates {
        match connector.connect(&addr) {
            Ok(stream) => return Ok((stream, addr)),
            Err(err) => {
                warn!(addr, error = %err, "access point unreachable, trying next candidate");
                attempts.push(addr);
            }
        }
    }

    Err(TransportError::Exhausted { attempts })
}
