//! TCP listener implementation.

use std::fs::File;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tracing::{debug, warn};

use super::{Connection, Listener};
use crate::config::IpFamily;

/// Largest single sendfile(2) request.
#[cfg(target_os = "linux")]
const SENDFILE_CHUNK: u64 = 1 << 20;

/// Socket bind parameters.
#[derive(Debug, Clone, Copy)]
pub struct BindOptions {
    pub port: u16,
    pub ip: Option<IpAddr>,
    pub family: IpFamily,
    pub backlog: u32,
}

/// Bind the listening socket for the configured address family.
///
/// Without an explicit address, `IpFamily::Any` binds a dual-stack IPv6
/// socket and falls back to IPv4 on hosts without IPv6 support.
pub fn bind(opts: BindOptions) -> io::Result<std::net::TcpListener> {
    match (opts.ip, opts.family) {
        (Some(ip), family) => {
            let only_v6 = ip.is_ipv6().then_some(family == IpFamily::V6);
            bind_addr(SocketAddr::new(ip, opts.port), only_v6, opts.backlog)
        }
        (None, IpFamily::V4) => bind_addr(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), opts.port),
            None,
            opts.backlog,
        ),
        (None, IpFamily::V6) => bind_addr(
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), opts.port),
            Some(true),
            opts.backlog,
        ),
        (None, IpFamily::Any) => {
            let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), opts.port);
            match bind_addr(v6, Some(false), opts.backlog) {
                Ok(listener) => Ok(listener),
                Err(e) if ipv6_unavailable(&e) => {
                    debug!(error = %e, "IPv6 unavailable, binding IPv4 only");
                    bind_addr(
                        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), opts.port),
                        None,
                        opts.backlog,
                    )
                }
                Err(e) => Err(e),
            }
        }
    }
}

fn ipv6_unavailable(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EAFNOSUPPORT) | Some(libc::EADDRNOTAVAIL) | Some(libc::EPROTONOSUPPORT)
    )
}

fn bind_addr(addr: SocketAddr, only_v6: Option<bool>, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if let Some(v6only) = only_v6 {
        socket.set_only_v6(v6only)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Per-connection socket options.
fn tune_stream(stream: &TcpStream) {
    // Set TCP_NODELAY for lower latency
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "Failed to set TCP_NODELAY");
    }

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(5));
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}

/// A TCP connection.
pub struct TcpConnection {
    stream: TcpStream,
    remote_addr: SocketAddr,
}

impl TcpConnection {
    /// Create a new TCP connection.
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream,
            remote_addr,
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    #[cfg(target_os = "linux")]
    async fn send_file(&mut self, file: &File, offset: u64, len: u64) -> io::Result<u64> {
        use std::os::fd::AsRawFd;
        use tokio::io::Interest;

        let out_fd = self.stream.as_raw_fd();
        let in_fd = file.as_raw_fd();
        let mut off = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let mut sent = 0u64;

        while sent < len {
            let chunk = (len - sent).min(SENDFILE_CHUNK) as usize;
            self.stream.writable().await?;
            let result = self.stream.try_io(Interest::WRITABLE, || {
                // SAFETY: both descriptors stay open for the duration of the call
                let rc = unsafe { libc::sendfile(out_fd, in_fd, &mut off, chunk) };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(rc as u64)
                }
            });
            match result {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(sent)
    }
}

impl tokio::io::AsyncRead for TcpConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for TcpConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// A TCP listener that accepts plain TCP connections.
pub struct TcpListener {
    inner: TokioTcpListener,
}

impl TcpListener {
    /// Wrap an already registered tokio listener.
    pub fn new(listener: TokioTcpListener) -> Self {
        Self { inner: listener }
    }

    /// Register a std listener with the current runtime.
    pub fn from_std(listener: std::net::TcpListener) -> io::Result<Self> {
        Ok(Self::new(TokioTcpListener::from_std(listener)?))
    }
}

impl Listener for TcpListener {
    type Conn = TcpConnection;

    fn accept(
        &self,
    ) -> Pin<Box<dyn Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send + '_>> {
        Box::pin(async move {
            let (stream, addr) = self.inner.accept().await?;
            tune_stream(&stream);
            Ok((stream, addr))
        })
    }

    fn handshake(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Pin<Box<dyn Future<Output = io::Result<Self::Conn>> + Send + '_>> {
        Box::pin(async move { Ok(TcpConnection::new(stream, remote_addr)) })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
