//! HTTP response model and head serialization.

pub mod static_file;

use std::fmt::Write as _;
use std::io;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

use crate::cgi::CgiBody;

pub use static_file::{resolve_range, serve_file, RangeResolution};

/// Server header value.
pub static SERVER_HEADER: HeaderValue =
    HeaderValue::from_static(concat!("tokio_webfs/", env!("CARGO_PKG_VERSION")));

/// Response body source.
pub enum Body {
    Empty,
    Bytes(Bytes),
    /// Region of an open file, sent with sendfile where available.
    File {
        file: std::fs::File,
        offset: u64,
        len: u64,
    },
    /// CGI output of unknown length; the connection closes after it.
    Cgi(Box<CgiBody>),
}

impl Body {
    /// Length when known up front.
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(b) => Some(b.len() as u64),
            Body::File { len, .. } => Some(*len),
            Body::Cgi(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// Close the connection after this response.
    pub close: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
            close: false,
        }
    }

    /// In-memory body with its content type.
    pub fn bytes(status: StatusCode, content_type: &'static str, body: Bytes) -> Self {
        let mut resp = Self::new(status);
        resp.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        resp.body = Body::Bytes(body);
        resp
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }

    /// Add the headers every response carries.
    ///
    /// `keep_alive` reflects the request; the response's own `close` flag
    /// overrides it. Content-Length is filled in for bodies of known size,
    /// except for 304 which describes the omitted representation.
    pub fn finalize(&mut self, keep_alive: bool, cors_origin: Option<&HeaderValue>) {
        if !keep_alive || self.body.len().is_none() {
            self.close = true;
        }

        self.headers.insert(header::SERVER, SERVER_HEADER.clone());
        if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now())) {
            self.headers.insert(header::DATE, date);
        }
        self.headers.insert(
            header::CONNECTION,
            HeaderValue::from_static(if self.close { "close" } else { "keep-alive" }),
        );
        if let Some(origin) = cors_origin {
            self.headers
                .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }

        if self.status != StatusCode::NOT_MODIFIED && !self.headers.contains_key(header::CONTENT_LENGTH) {
            if let Some(len) = self.body.len() {
                self.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
        }
    }

    /// Serialize the status line and headers.
    pub fn encode_head(&self, out: &mut BytesMut) {
        let reason = self.status.canonical_reason().unwrap_or("");
        let _ = write!(out, "HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason);
        for (name, value) in &self.headers {
            out.put_slice(name.as_str().as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");
    }
}

/// Status for a failed open or stat of a request path.
pub fn io_error_status(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        _ if e.raw_os_error() == Some(libc::ENOTDIR) => StatusCode::NOT_FOUND,
        _ if e.raw_os_error() == Some(libc::ENAMETOOLONG) => StatusCode::NOT_FOUND,
        _ if e.raw_os_error() == Some(libc::ELOOP) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
