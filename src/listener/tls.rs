//! TLS listener implementation using rustls.

use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use super::{Connection, Listener, TlsInfo};

/// Upper bound on a TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Load cert chain and key, build the acceptor.
///
/// Runs during startup, before chroot makes the files unreachable.
pub fn load_acceptor(
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsAcceptor, Box<dyn std::error::Error + Send + Sync>> {
    // Load certificate chain
    let cert_file = File::open(cert_path)
        .map_err(|e| format!("cannot open certificate {}: {}", cert_path.display(), e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;

    if certs.is_empty() {
        return Err(format!("no certificates found in {}", cert_path.display()).into());
    }

    // Load private key
    let key_file = File::open(key_path)
        .map_err(|e| format!("cannot open private key {}: {}", key_path.display(), e))?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| format!("no private key found in {}", key_path.display()))?;

    let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
    let mut tls_config = RustlsConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    // HTTP/1.x only
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec(), b"http/1.0".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// A TLS connection.
pub struct TlsConnection {
    stream: TlsStream<TcpStream>,
    remote_addr: SocketAddr,
    tls_info: TlsInfo,
}

impl TlsConnection {
    /// Create a new TLS connection.
    pub fn new(stream: TlsStream<TcpStream>, remote_addr: SocketAddr, tls_info: TlsInfo) -> Self {
        Self {
            stream,
            remote_addr,
            tls_info,
        }
    }
}

// File bodies go through the default buffered copy: bytes must be encrypted.
#[async_trait]
impl Connection for TlsConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn tls_info(&self) -> Option<TlsInfo> {
        Some(self.tls_info.clone())
    }
}

impl tokio::io::AsyncRead for TlsConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for TlsConnection {
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

/// A TLS listener that accepts encrypted connections.
pub struct TlsListener {
    tcp_listener: TokioTcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    /// Create a TLS listener from an existing TCP listener and acceptor.
    pub fn from_parts(tcp_listener: TokioTcpListener, acceptor: TlsAcceptor) -> Self {
        Self {
            tcp_listener,
            acceptor,
        }
    }

    /// Get TLS protocol version string.
    fn protocol_version(conn: &TlsStream<TcpStream>) -> String {
        let (_, server_conn) = conn.get_ref();
        match server_conn.protocol_version() {
            Some(tokio_rustls::rustls::ProtocolVersion::TLSv1_2) => "TLSv1.2".to_string(),
            Some(tokio_rustls::rustls::ProtocolVersion::TLSv1_3) => "TLSv1.3".to_string(),
            _ => "unknown".to_string(),
        }
    }
}

impl Listener for TlsListener {
    type Conn = TlsConnection;

    fn accept(
        &self,
    ) -> Pin<Box<dyn Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send + '_>> {
        Box::pin(async move {
            let (stream, addr) = self.tcp_listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
            }
            Ok((stream, addr))
        })
    }

    fn handshake(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Pin<Box<dyn Future<Output = io::Result<Self::Conn>> + Send + '_>> {
        Box::pin(async move {
            let handshake_start = Instant::now();
            let tls_stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.acceptor.accept(stream))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timeout"))?
                .map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e))?;

            let tls_info = TlsInfo {
                protocol: Self::protocol_version(&tls_stream),
                handshake_duration: handshake_start.elapsed(),
            };

            Ok(TlsConnection::new(tls_stream, remote_addr, tls_info))
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp_listener.local_addr()
    }

    fn name(&self) -> &'static str {
        "tls"
    }
}
