//! CGI/1.1 GET delegation.
//!
//! Requests under the configured prefix name a script file, optionally
//! followed by extra path segments passed as `PATH_INFO`. The script runs
//! with a cleared environment built from the request and is bounded by the
//! network timeout for its whole lifetime.

mod output;
mod process;

pub use output::{parse_head, CgiHead, MAX_CGI_HEAD};
pub use process::BoundedProcess;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header;
use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::server::request::Request;
use crate::server::response::{Body, Response};

/// CGI environment variable names.
mod env_keys {
    pub const GATEWAY_INTERFACE: &str = "GATEWAY_INTERFACE";
    pub const SERVER_SOFTWARE: &str = "SERVER_SOFTWARE";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const REQUEST_URI: &str = "REQUEST_URI";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const SCRIPT_FILENAME: &str = "SCRIPT_FILENAME";
    pub const PATH_INFO: &str = "PATH_INFO";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const DOCUMENT_ROOT: &str = "DOCUMENT_ROOT";
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const REMOTE_PORT: &str = "REMOTE_PORT";
    pub const REMOTE_USER: &str = "REMOTE_USER";
    pub const AUTH_TYPE: &str = "AUTH_TYPE";
    pub const HTTPS: &str = "HTTPS";
    pub const SSL_PROTOCOL: &str = "SSL_PROTOCOL";
    pub const PATH: &str = "PATH";
}

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Read size for script output.
const READ_CHUNK: usize = 16 * 1024;

/// CGI invocation failure.
#[derive(Debug)]
pub enum CgiError {
    /// The script could not be started.
    Spawn(io::Error),
    /// The script outlived its deadline and was killed.
    Timeout,
    /// The script's header block is unusable.
    MalformedOutput(&'static str),
    Io(io::Error),
}

impl CgiError {
    pub fn status(&self) -> StatusCode {
        match self {
            CgiError::Spawn(_) | CgiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CgiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            CgiError::MalformedOutput(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CgiError::Timeout)
    }
}

impl fmt::Display for CgiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgiError::Spawn(e) => write!(f, "failed to start CGI script: {}", e),
            CgiError::Timeout => write!(f, "CGI script timed out"),
            CgiError::MalformedOutput(reason) => write!(f, "malformed CGI output: {}", reason),
            CgiError::Io(e) => write!(f, "CGI I/O error: {}", e),
        }
    }
}

impl std::error::Error for CgiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CgiError::Spawn(e) | CgiError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A script located under the CGI prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiScript {
    /// URL path of the script itself.
    pub script_name: String,
    pub script_path: PathBuf,
    /// Remaining URL path after the script, empty when none.
    pub path_info: String,
}

/// Per-connection facts exported to the script.
#[derive(Debug, Clone, Copy)]
pub struct CgiContext<'a> {
    pub remote_addr: SocketAddr,
    /// Negotiated TLS version, `None` on plain TCP.
    pub tls_protocol: Option<&'a str>,
    pub remote_user: Option<&'a str>,
    pub document_root: &'a Path,
}

pub struct CgiInvoker {
    /// Normalized `/dir/` prefix
    prefix: String,
    timeout: Duration,
    server_name: String,
    server_port: u16,
}

impl CgiInvoker {
    /// `prefix` must already be in `/dir/` form.
    pub fn new(prefix: String, timeout: Duration, server_name: String, server_port: u16) -> Self {
        Self {
            prefix,
            timeout,
            server_name,
            server_port,
        }
    }

    /// Whether a normalized URL path is handled by CGI.
    pub fn matches(&self, url_path: &str) -> bool {
        url_path.starts_with(&self.prefix) || url_path == self.prefix.trim_end_matches('/')
    }

    /// Find the script named by `url_path` under `root`.
    ///
    /// The first path segment that is not a directory must be an executable
    /// regular file; everything after it becomes `PATH_INFO`.
    pub async fn locate(&self, root: &Path, url_path: &str) -> Result<CgiScript, StatusCode> {
        let rest = url_path
            .strip_prefix(&self.prefix)
            .ok_or(StatusCode::FORBIDDEN)?;
        let base = self.prefix.trim_matches('/');

        let mut fs_path = root.join(base);
        let mut script_name = format!("/{}", base);
        let mut segments = rest.split('/').filter(|s| !s.is_empty());

        while let Some(segment) = segments.next() {
            fs_path.push(segment);
            script_name.push('/');
            script_name.push_str(segment);

            let meta = tokio::fs::metadata(&fs_path)
                .await
                .map_err(|e| crate::server::response::io_error_status(&e))?;
            if meta.is_dir() {
                continue;
            }
            if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
                return Err(StatusCode::FORBIDDEN);
            }

            let remaining: Vec<&str> = segments.collect();
            let mut path_info = String::new();
            for seg in &remaining {
                path_info.push('/');
                path_info.push_str(seg);
            }
            if !remaining.is_empty() && url_path.ends_with('/') {
                path_info.push('/');
            }
            return Ok(CgiScript {
                script_name,
                script_path: fs_path,
                path_info,
            });
        }

        // Directories under the prefix are never listed
        Err(StatusCode::FORBIDDEN)
    }

    fn command(&self, script: &CgiScript, req: &Request, ctx: &CgiContext<'_>) -> Command {
        use env_keys::*;

        let mut cmd = Command::new(&script.script_path);
        cmd.env_clear();
        if let Some(dir) = script.script_path.parent() {
            cmd.current_dir(dir);
        }

        cmd.env(GATEWAY_INTERFACE, "CGI/1.1")
            .env(SERVER_SOFTWARE, concat!("tokio_webfs/", env!("CARGO_PKG_VERSION")))
            .env(SERVER_NAME, &self.server_name)
            .env(SERVER_PORT, self.server_port.to_string())
            .env(SERVER_PROTOCOL, req.protocol())
            .env(REQUEST_METHOD, req.method.as_str())
            .env(REQUEST_URI, req.request_uri())
            .env(SCRIPT_NAME, &script.script_name)
            .env(SCRIPT_FILENAME, &script.script_path)
            .env(QUERY_STRING, req.query.as_deref().unwrap_or(""))
            .env(DOCUMENT_ROOT, ctx.document_root)
            .env(REMOTE_ADDR, ctx.remote_addr.ip().to_string())
            .env(REMOTE_PORT, ctx.remote_addr.port().to_string())
            .env(PATH, DEFAULT_PATH);

        if !script.path_info.is_empty() {
            cmd.env(PATH_INFO, &script.path_info);
        }
        if let Some(protocol) = ctx.tls_protocol {
            cmd.env(HTTPS, "on").env(SSL_PROTOCOL, protocol);
        }
        if let Some(user) = ctx.remote_user {
            cmd.env(AUTH_TYPE, "Basic").env(REMOTE_USER, user);
        }

        for (name, value) in &req.headers {
            if *name == header::AUTHORIZATION {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            let key = format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"));
            cmd.env(key, value);
        }

        cmd
    }

    /// Run the script and read its header block.
    ///
    /// The returned response streams the rest of the output and closes the
    /// connection when done.
    pub async fn invoke(
        &self,
        script: &CgiScript,
        req: &Request,
        ctx: &CgiContext<'_>,
    ) -> Result<Response, CgiError> {
        let mut process =
            BoundedProcess::spawn(self.command(script, req, ctx), self.timeout).map_err(CgiError::Spawn)?;
        debug!(
            script = %script.script_path.display(),
            pid = process.id().unwrap_or(0),
            "Started CGI script"
        );

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let mut chunk = vec![0u8; READ_CHUNK];
        let head = loop {
            let n = match process.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    process.terminate().await;
                    return Err(e);
                }
            };
            if n == 0 {
                let result = parse_head(&buf).and_then(|h| {
                    h.ok_or(CgiError::MalformedOutput("output ended inside header block"))
                });
                match result {
                    Ok(head) => break head,
                    Err(e) => {
                        process.terminate().await;
                        return Err(e);
                    }
                }
            }
            buf.extend_from_slice(&chunk[..n]);
            match parse_head(&buf) {
                Ok(Some(head)) => break head,
                Ok(None) => {}
                Err(e) => {
                    process.terminate().await;
                    return Err(e);
                }
            }
        };

        let (CgiHead { status, headers }, used) = head;
        let leftover = buf.split_off(used).freeze();

        let mut resp = Response::new(status).closing();
        resp.headers = headers;
        resp.body = Body::Cgi(Box::new(CgiBody { leftover, process }));
        Ok(resp)
    }
}

/// Remaining script output after the header block.
pub struct CgiBody {
    leftover: Bytes,
    process: BoundedProcess,
}

impl CgiBody {
    /// Stream the output to `out` and reap the script.
    ///
    /// Each write is bounded by `write_timeout`; reads share the script's
    /// deadline. Returns the number of body bytes written.
    pub async fn write_to<W>(mut self, out: &mut W, write_timeout: Duration) -> Result<u64, CgiError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut written = 0u64;
        let result = self.pump(out, write_timeout, &mut written).await;
        match result {
            Ok(()) => {
                let status = self.process.wait().await?;
                if !status.success() {
                    debug!(status = %status, "CGI script exited unsuccessfully");
                }
                Ok(written)
            }
            Err(e) => {
                self.process.terminate().await;
                Err(e)
            }
        }
    }

    async fn pump<W>(&mut self, out: &mut W, write_timeout: Duration, written: &mut u64) -> Result<(), CgiError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        if !self.leftover.is_empty() {
            write_bounded(out, &self.leftover, write_timeout).await?;
            *written += self.leftover.len() as u64;
        }

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = self.process.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            write_bounded(out, &chunk[..n], write_timeout).await?;
            *written += n as u64;
        }
    }
}

async fn write_bounded<W>(out: &mut W, data: &[u8], limit: Duration) -> Result<(), CgiError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    match tokio::time::timeout(limit, out.write_all(data)).await {
        Ok(result) => result.map_err(CgiError::Io),
        Err(_) => Err(CgiError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "client write timed out",
        ))),
    }
}
