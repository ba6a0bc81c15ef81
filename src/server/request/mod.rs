//! HTTP/1.x request model.

mod parser;

use std::sync::Arc;
use std::time::SystemTime;

use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Version};

pub use parser::{ParseError, RequestParser, MAX_HEADERS, MAX_HEADER_BYTES};

/// A single `bytes=` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`, inclusive.
    FromTo(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`, the last n bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// Only a single range is supported. Multiple ranges, other units and
    /// malformed specs return `None` so the request is served in full.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (unit, spec) = value.split_once('=')?;
        if !unit.trim().eq_ignore_ascii_case("bytes") || spec.contains(',') {
            return None;
        }

        let (start, end) = spec.trim().split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        match (start.is_empty(), end.is_empty()) {
            (true, false) => end.parse().ok().map(ByteRange::Suffix),
            (false, true) => start.parse().ok().map(ByteRange::From),
            (false, false) => {
                let a: u64 = start.parse().ok()?;
                let b: u64 = end.parse().ok()?;
                (b >= a).then_some(ByteRange::FromTo(a, b))
            }
            (true, true) => None,
        }
    }
}

/// A parsed request head.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub version: Version,
    /// Start line as received, for the access log.
    pub request_line: String,
    /// Path component before decoding.
    pub raw_path: String,
    /// Percent-decoded path.
    pub path: String,
    /// Raw query string without the `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Lowercased host without port.
    pub host: Option<String>,
    /// Virtual host selected during dispatch.
    pub vhost: Option<Arc<str>>,
    pub range: Option<ByteRange>,
    pub if_modified_since: Option<SystemTime>,
    pub authorization: Option<HeaderValue>,
    /// Declared body length; the body itself is discarded.
    pub content_length: u64,
}

impl Request {
    /// Whether the connection may carry another request after this one.
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim);

        let mut close = false;
        let mut keep = false;
        for token in connection {
            if token.eq_ignore_ascii_case("close") {
                close = true;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                keep = true;
            }
        }

        match self.version {
            Version::HTTP_11 => !close,
            _ => keep && !close,
        }
    }

    /// Protocol string for CGI and logging.
    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        }
    }

    /// Path plus query as received.
    pub fn request_uri(&self) -> String {
        match self.query {
            Some(ref q) => format!("{}?{}", self.raw_path, q),
            None => self.raw_path.clone(),
        }
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}
