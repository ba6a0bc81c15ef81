//! Listener abstractions for accepting connections.
//!
//! Accepting is split in two: [`Listener::accept`] pulls a raw TCP stream off
//! the kernel queue and returns immediately, [`Listener::handshake`] turns it
//! into a [`Connection`]. The handshake runs inside the connection's own task
//! so a slow TLS client never stalls the accept loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Listener trait                    │
//! │  ┌─────────────┐                  ┌─────────────┐    │
//! │  │ TcpListener │                  │ TlsListener │    │
//! │  │  (tcp.rs)   │                  │  (tls.rs)   │    │
//! │  └──────┬──────┘                  └──────┬──────┘    │
//! │         │ accept() + handshake()         │           │
//! │         └───────────────┬────────────────┘           │
//! │                 ┌───────▼───────┐                    │
//! │                 │  Connection   │ read/write/sendfile│
//! │                 └───────────────┘                    │
//! └──────────────────────────────────────────────────────┘
//! ```

mod tcp;
mod tls;

pub use tcp::{bind, BindOptions, TcpConnection, TcpListener};
pub use tls::{load_acceptor, TlsConnection, TlsListener};

use std::fs::File;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tokio::net::TcpStream;

/// A connection produced by a listener handshake.
#[async_trait]
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Get the remote address of the connection.
    fn remote_addr(&self) -> SocketAddr;

    /// Get TLS information if this is a TLS connection.
    fn tls_info(&self) -> Option<TlsInfo> {
        None
    }

    /// Write `len` bytes of `file` starting at `offset` to the peer.
    ///
    /// Returns the number of bytes written; fewer than `len` means the file
    /// shrank while being sent.
    async fn send_file(&mut self, file: &File, offset: u64, len: u64) -> io::Result<u64> {
        copy_file(self, file, offset, len).await
    }
}

/// TLS connection information.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    /// TLS protocol version (e.g., "TLSv1.3").
    pub protocol: String,
    /// TLS handshake duration.
    pub handshake_duration: Duration,
}

/// Trait for listening and accepting connections.
pub trait Listener: Send + Sync + 'static {
    /// The connection type produced by this listener.
    type Conn: Connection;

    /// Accept a raw TCP stream.
    fn accept(
        &self,
    ) -> Pin<Box<dyn Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send + '_>>;

    /// Complete any protocol handshake on an accepted stream.
    fn handshake(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Pin<Box<dyn Future<Output = io::Result<Self::Conn>> + Send + '_>>;

    /// Get the local address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Get the listener name for logging.
    fn name(&self) -> &'static str;
}

/// Buffered file-to-socket copy, used where sendfile is unavailable.
pub(crate) async fn copy_file<W>(writer: &mut W, file: &File, offset: u64, len: u64) -> io::Result<u64>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut source = tokio::fs::File::from_std(file.try_clone()?);
    source.seek(SeekFrom::Start(offset)).await?;
    let mut limited = source.take(len);
    tokio::io::copy(&mut limited, writer).await
}
