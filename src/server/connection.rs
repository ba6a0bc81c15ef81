//! Per-connection HTTP/1.x state machine.
//!
//! A connection is served by the worker that accepted it until it closes.
//! Requests on one connection are handled strictly in order, including
//! pipelined ones already sitting in the read buffer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::{Buf, BytesMut};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::access_log::{AccessLog, AccessRecord};
use super::auth::BasicAuth;
use super::dir_cache::DirCache;
use super::error_pages::ErrorPages;
use super::request::{ParseError, Request, RequestParser};
use super::response::{Body, Response};
use super::vhost::VirtualHostMap;
use crate::cgi::CgiInvoker;
use crate::config::Config;
use crate::listener::{Connection, TlsInfo};
use crate::mime::MimeTable;

/// Initial read buffer size.
const READ_BUF: usize = 8 * 1024;

/// Largest request body that is read and discarded.
const MAX_DISCARD_BODY: u64 = 64 * 1024;

/// Largest single file write; each chunk gets its own timeout.
const FILE_CHUNK: u64 = 1 << 20;

/// Where a connection is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ReadingRequest,
    AwaitingBody,
    Processing,
    WritingResponse,
    KeepAliveIdle,
    Closing,
}

enum ReadOutcome {
    Data,
    Eof,
    TimedOut,
    Shutdown,
    Failed(std::io::Error),
}

/// The client end of a connection.
pub(crate) struct Peer {
    pub addr: SocketAddr,
    pub tls: Option<TlsInfo>,
}

/// Everything a worker needs to serve requests. Shared by all workers and
/// read-only once built, apart from the directory cache and log sink.
pub struct ConnectionContext {
    pub config: Arc<Config>,
    /// Document root after chroot, `/` when confined.
    pub root: PathBuf,
    pub vhosts: VirtualHostMap,
    pub dir_cache: Arc<DirCache>,
    pub mime: Arc<MimeTable>,
    pub auth: Option<BasicAuth>,
    pub cgi: Option<CgiInvoker>,
    pub error_pages: ErrorPages,
    pub access_log: Option<Arc<AccessLog>>,
    pub cors_origin: Option<HeaderValue>,
    pub is_tls: bool,
    /// Port clients connect to, for redirects and CGI.
    pub port: u16,
}

impl ConnectionContext {
    fn network_timeout(&self) -> Duration {
        self.config.server.network_timeout
    }

    /// Error response with an HTML body.
    pub(crate) fn error_response(&self, status: StatusCode) -> Response {
        let mut resp = Response::new(status);
        resp.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        resp.body = Body::Bytes(self.error_pages.body(status));
        resp
    }

    /// Serve `conn` until it closes, errors, idles out or shutdown is seen.
    pub async fn serve<C: Connection>(&self, mut conn: C, mut shutdown: watch::Receiver<bool>) {
        let remote = conn.remote_addr();
        let peer = Peer {
            addr: remote,
            tls: conn.tls_info(),
        };
        if let Some(ref tls) = peer.tls {
            debug!(
                %remote,
                protocol = %tls.protocol,
                handshake_ms = tls.handshake_duration.as_millis() as u64,
                "TLS session established"
            );
        }
        let mut buf = BytesMut::with_capacity(READ_BUF);
        let mut parser = RequestParser::new();
        let mut state = ConnState::ReadingRequest;
        let mut served = 0u64;

        loop {
            let mut req = match parser.parse(&mut buf) {
                Ok(Some(req)) => req,
                Ok(None) => {
                    if buf.is_empty() && served > 0 {
                        advance(&mut state, ConnState::KeepAliveIdle, remote);
                    }
                    match self.read_more(&mut conn, &mut buf, &mut shutdown).await {
                        ReadOutcome::Data => {
                            advance(&mut state, ConnState::ReadingRequest, remote);
                            continue;
                        }
                        ReadOutcome::Eof => {}
                        ReadOutcome::TimedOut => debug!(%remote, ?state, "Connection timed out"),
                        ReadOutcome::Shutdown => trace!(%remote, "Closing connection for shutdown"),
                        ReadOutcome::Failed(e) => debug!(%remote, error = %e, "Read error"),
                    }
                    break;
                }
                Err(e) => {
                    debug!(%remote, error = %e, "Protocol error");
                    self.reject(&mut conn, remote, &e).await;
                    break;
                }
            };

            if req.content_length > 0 {
                advance(&mut state, ConnState::AwaitingBody, remote);
                if req.content_length > MAX_DISCARD_BODY {
                    let resp = self.error_response(StatusCode::PAYLOAD_TOO_LARGE).closing();
                    let _ = self
                        .respond(&mut conn, remote, &req, resp, false, false, SystemTime::now())
                        .await;
                    break;
                }
                if !self.discard_body(&mut conn, &mut buf, req.content_length).await {
                    break;
                }
            }

            advance(&mut state, ConnState::Processing, remote);
            let started = SystemTime::now();
            let (resp, authenticated) = self.dispatch(&mut req, &peer).await;

            advance(&mut state, ConnState::WritingResponse, remote);
            let keep_alive = req.keep_alive() && !*shutdown.borrow();
            match self
                .respond(&mut conn, remote, &req, resp, keep_alive, authenticated, started)
                .await
            {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    debug!(%remote, error = %e, "Write error");
                    break;
                }
            }
            served += 1;
        }

        advance(&mut state, ConnState::Closing, remote);
        trace!(%remote, served, "Connection finished");
        let _ = tokio::time::timeout(Duration::from_secs(1), conn.shutdown()).await;
    }

    async fn read_more<C: Connection>(
        &self,
        conn: &mut C,
        buf: &mut BytesMut,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ReadOutcome {
        if *shutdown.borrow() {
            return ReadOutcome::Shutdown;
        }
        buf.reserve(READ_BUF);
        tokio::select! {
            result = tokio::time::timeout(self.network_timeout(), conn.read_buf(buf)) => match result {
                Ok(Ok(0)) => ReadOutcome::Eof,
                Ok(Ok(_)) => ReadOutcome::Data,
                Ok(Err(e)) => ReadOutcome::Failed(e),
                Err(_) => ReadOutcome::TimedOut,
            },
            changed = shutdown.changed() => match changed {
                Ok(()) if !*shutdown.borrow() => ReadOutcome::Data,
                _ => ReadOutcome::Shutdown,
            },
        }
    }

    /// Drop `len` body bytes. Returns false when the connection is unusable.
    async fn discard_body<C: Connection>(&self, conn: &mut C, buf: &mut BytesMut, len: u64) -> bool {
        let buffered = (buf.len() as u64).min(len);
        buf.advance(buffered as usize);
        let mut remaining = len - buffered;

        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            match tokio::time::timeout(self.network_timeout(), conn.read(&mut scratch[..want])).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return false,
                Ok(Ok(n)) => remaining -= n as u64,
            }
        }
        true
    }

    /// Answer a protocol error and log it.
    async fn reject<C: Connection>(&self, conn: &mut C, remote: SocketAddr, err: &ParseError) {
        let mut resp = self.error_response(err.status()).closing();
        resp.finalize(false, self.cors_origin.as_ref());
        let time = SystemTime::now();
        let bytes = match self.write_response(conn, resp, false).await {
            Ok(n) => n,
            Err(_) => 0,
        };
        self.log_access(&AccessRecord {
            remote: remote.ip(),
            user: None,
            time,
            request_line: "-",
            status: err.status().as_u16(),
            bytes,
        });
    }

    /// Finalize, write and log one response.
    ///
    /// Returns whether the connection may be reused.
    #[allow(clippy::too_many_arguments)]
    async fn respond<C: Connection>(
        &self,
        conn: &mut C,
        remote: SocketAddr,
        req: &Request,
        mut resp: Response,
        keep_alive: bool,
        authenticated: bool,
        started: SystemTime,
    ) -> std::io::Result<bool> {
        resp.finalize(keep_alive, self.cors_origin.as_ref());
        let reusable = !resp.close;
        let status = resp.status.as_u16();

        let result = self.write_response(conn, resp, req.is_head()).await;
        let user = match (authenticated, self.auth.as_ref()) {
            (true, Some(auth)) => Some(auth.user()),
            _ => None,
        };
        self.log_access(&AccessRecord {
            remote: remote.ip(),
            user,
            time: started,
            request_line: &req.request_line,
            status,
            bytes: *result.as_ref().unwrap_or(&0),
        });

        result.map(|_| reusable)
    }

    fn log_access(&self, record: &AccessRecord<'_>) {
        if let Some(ref log) = self.access_log {
            log.write(record);
        }
    }

    /// Write head and body. Returns the number of body bytes sent.
    async fn write_response<C: Connection>(
        &self,
        conn: &mut C,
        resp: Response,
        head_only: bool,
    ) -> std::io::Result<u64> {
        let limit = self.network_timeout();
        let mut head = BytesMut::with_capacity(512);
        resp.encode_head(&mut head);
        bounded(limit, conn.write_all(&head)).await?;

        let sent = match resp.body {
            _ if head_only => 0,
            Body::Empty => 0,
            Body::Bytes(bytes) => {
                bounded(limit, conn.write_all(&bytes)).await?;
                bytes.len() as u64
            }
            Body::File { file, offset, len } => {
                let mut sent = 0u64;
                while sent < len {
                    let chunk = (len - sent).min(FILE_CHUNK);
                    let n = bounded(limit, conn.send_file(&file, offset + sent, chunk)).await?;
                    if n == 0 {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "file shrank while being sent",
                        ));
                    }
                    sent += n;
                }
                sent
            }
            Body::Cgi(body) => body
                .write_to(conn, limit)
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))?,
        };

        bounded(limit, conn.flush()).await?;
        Ok(sent)
    }
}

fn advance(state: &mut ConnState, next: ConnState, remote: SocketAddr) {
    if *state != next {
        trace!(%remote, from = ?state, to = ?next, "Connection state");
        *state = next;
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> std::io::Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write timed out",
        )),
    }
}
