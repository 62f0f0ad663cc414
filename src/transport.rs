//! Transport boundary.
//!
//! The core needs nothing but an ordered, reliable byte stream that can be
//! read, written and shut down: anything implementing [`Transport`]. The
//! [`Listener`] trait lets [`Server::accept`](crate::server::Server::accept)
//! run over TCP or, on Unix, a domain socket.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::transport::generate_socket_path;
//! use tokio::net::UnixListener;
//!
//! let path = generate_socket_path();
//! let listener = UnixListener::bind(&path)?;
//! ```

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::server::BoxFuture;

/// A bidirectional byte stream the codec can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased read half.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased write half.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Source of incoming connections.
pub trait Listener: Send + Sync + 'static {
    /// Connection type produced by `accept`.
    type Stream: Transport;

    /// Wait for the next connection; returns it with a printable peer address.
    fn accept(&self) -> BoxFuture<'_, io::Result<(Self::Stream, String)>>;
}

impl Listener for TcpListener {
    type Stream = tokio::net::TcpStream;

    fn accept(&self) -> BoxFuture<'_, io::Result<(Self::Stream, String)>> {
        Box::pin(async move {
            let (stream, addr) = TcpListener::accept(self).await?;
            stream.set_nodelay(true)?;
            Ok((stream, addr.to_string()))
        })
    }
}

#[cfg(unix)]
impl Listener for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    fn accept(&self) -> BoxFuture<'_, io::Result<(Self::Stream, String)>> {
        Box::pin(async move {
            let (stream, addr) = tokio::net::UnixListener::accept(self).await?;
            let peer = addr
                .as_pathname()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unix:unnamed".to_string());
            Ok((stream, peer))
        })
    }
}

/// Generate a unique Unix socket path for this process.
///
/// Format: `/tmp/seqwire-{pid}-{random}.sock`
#[cfg(unix)]
pub fn generate_socket_path() -> String {
    format!("/tmp/seqwire-{}-{:x}.sock", std::process::id(), rand_u64())
}

/// Random-enough u64 from the clock, a per-process counter and the PID.
#[cfg(unix)]
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ count.rotate_left(32)
}
