use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected access-point stream. Implements Read + Write.
///
/// The stream can be cloned into independent handles (one per direction) and
/// shut down from any clone, which unblocks a reader parked in `read`.
pub struct ApStream {
    inner: ApStreamInner,
}

enum ApStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for ApStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ApStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            ApStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ApStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ApStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            ApStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ApStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            ApStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl From<TcpStream> for ApStream {
    fn from(stream: TcpStream) -> Self {
        Self::from_tcp(stream)
    }
}

impl ApStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: ApStreamInner::Tcp(stream),
        }
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: ApStreamInner::Unix(stream),
        }
    }

    /// Create a connected in-process pair. Used to run a client against a
    /// local fake access point.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ApStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ApStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ApStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ApStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            ApStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            #[cfg(unix)]
            ApStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Shut down both directions. Any thread blocked reading from a clone of
    /// this stream wakes up with EOF or an error.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            ApStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            ApStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            // Already shut down by the peer or a previous call.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Remote address, for diagnostics.
    pub fn peer_addr(&self) -> Option<String> {
        match &self.inner {
            ApStreamInner::Tcp(stream) => stream.peer_addr().ok().map(|addr| addr.to_string()),
            #[cfg(unix)]
            ApStreamInner::Unix(_) => None,
        }
    }

    /// Convert a TCP-backed stream into a tokio stream for the async codec.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(feature = "async")]
    pub fn into_tokio_tcp(self) -> Result<tokio::net::TcpStream> {
        match self.inner {
            ApStreamInner::Tcp(stream) => {
                stream.set_nonblocking(true)?;
                Ok(tokio::net::TcpStream::from_std(stream)?)
            }
            #[cfg(unix)]
            ApStreamInner::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "only TCP access-point streams can be converted to tokio streams",
            )
            .into()),
        }
    }
}

impl std::fmt::Debug for ApStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            ApStreamInner::Tcp(stream) => f
                .debug_struct("ApStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
            #[cfg(unix)]
            ApStreamInner::Unix(_) => f.debug_struct("ApStream").field("type", &"unix").finish(),
        }
    }
}
