//! Incremental HTTP/1.x request head parser.

use std::fmt;

use bytes::{Buf, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use memchr::memchr_iter;
use percent_encoding::percent_decode_str;

use super::{ByteRange, Request};

/// Largest accepted request head.
pub const MAX_HEADER_BYTES: usize = 8192;

/// Largest accepted header count.
pub const MAX_HEADERS: usize = 64;

/// A request that cannot be served; the connection is closed after the
/// error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Malformed start line, header or target.
    BadRequest(&'static str),
    /// Head larger than [`MAX_HEADER_BYTES`].
    HeaderTooLarge,
    /// More than [`MAX_HEADERS`] header fields.
    TooManyHeaders,
    /// Well-formed HTTP version other than 1.0 or 1.1.
    VersionNotSupported,
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ParseError::HeaderTooLarge | ParseError::TooManyHeaders => {
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
            }
            ParseError::VersionNotSupported => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BadRequest(reason) => write!(f, "bad request: {}", reason),
            ParseError::HeaderTooLarge => write!(f, "request head exceeds {} bytes", MAX_HEADER_BYTES),
            ParseError::TooManyHeaders => write!(f, "more than {} header fields", MAX_HEADERS),
            ParseError::VersionNotSupported => write!(f, "unsupported HTTP version"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parser state carried across partial reads of one connection.
#[derive(Debug, Default)]
pub struct RequestParser {
    /// Bytes already searched for the end of the head.
    scanned: usize,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take one complete request head off the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On success the head is
    /// consumed and anything after it (a body or a pipelined request) stays
    /// in `buf`.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
        // Tolerate blank lines between pipelined requests
        while buf.starts_with(b"\r\n") || buf.starts_with(b"\n") {
            let n = if buf[0] == b'\r' { 2 } else { 1 };
            buf.advance(n);
            self.scanned = self.scanned.saturating_sub(n);
        }

        let Some(end) = self.find_head_end(buf) else {
            if buf.len() > MAX_HEADER_BYTES {
                return Err(ParseError::HeaderTooLarge);
            }
            self.scanned = buf.len().saturating_sub(3);
            return Ok(None);
        };
        if end > MAX_HEADER_BYTES {
            return Err(ParseError::HeaderTooLarge);
        }

        self.scanned = 0;
        let head = buf.split_to(end);
        parse_head(&head).map(Some)
    }

    /// Offset just past the blank line ending the head.
    fn find_head_end(&self, buf: &[u8]) -> Option<usize> {
        let start = self.scanned.min(buf.len());
        for offset in memchr_iter(b'\n', &buf[start..]) {
            let i = start + offset;
            let blank = match i {
                0 => false,
                _ if buf[i - 1] == b'\n' => true,
                _ if i >= 2 && buf[i - 1] == b'\r' && buf[i - 2] == b'\n' => true,
                _ => false,
            };
            if blank {
                return Some(i + 1);
            }
        }
        None
    }
}

fn lines(head: &[u8]) -> impl Iterator<Item = &[u8]> {
    head.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn parse_head(head: &[u8]) -> Result<Request, ParseError> {
    let mut lines = lines(head);
    let start_line = lines
        .next()
        .and_then(|l| std::str::from_utf8(l).ok())
        .ok_or(ParseError::BadRequest("start line is not valid text"))?;

    let mut parts = start_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::BadRequest("malformed start line"));
    };

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ParseError::BadRequest("invalid method"))?;
    let version = parse_version(version)?;

    let mut headers = HeaderMap::new();
    let mut count = 0;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            return Err(ParseError::BadRequest("obsolete line folding"));
        }
        count += 1;
        if count > MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }

        let colon = memchr::memchr(b':', line).ok_or(ParseError::BadRequest("header without colon"))?;
        let name = HeaderName::from_bytes(&line[..colon])
            .map_err(|_| ParseError::BadRequest("invalid header name"))?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
            .map_err(|_| ParseError::BadRequest("invalid header value"))?;
        headers.insert(name, value);
    }

    if headers.contains_key(header::TRANSFER_ENCODING) {
        return Err(ParseError::BadRequest("request bodies with transfer-coding are not accepted"));
    }
    let content_length = match headers.get(header::CONTENT_LENGTH) {
        Some(v) => v
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or(ParseError::BadRequest("invalid content-length"))?,
        None => 0,
    };

    let (authority, origin) = split_target(target)?;
    let (raw_path, query) = match origin.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (origin, None),
    };

    let path = percent_decode_str(raw_path)
        .decode_utf8()
        .map_err(|_| ParseError::BadRequest("path is not valid UTF-8"))?;
    if path.contains('\0') {
        return Err(ParseError::BadRequest("NUL in path"));
    }

    let host_header = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    if version == Version::HTTP_11 && !headers.contains_key(header::HOST) && authority.is_none() {
        return Err(ParseError::BadRequest("missing Host header"));
    }
    let host = authority.or(host_header).and_then(normalize_host);

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v.trim()).ok());
    let authorization = headers.get(header::AUTHORIZATION).cloned();

    Ok(Request {
        method,
        version,
        request_line: start_line.to_string(),
        raw_path: raw_path.to_string(),
        path: path.into_owned(),
        query,
        headers,
        host,
        vhost: None,
        range,
        if_modified_since,
        authorization,
        content_length,
    })
}

fn parse_version(version: &str) -> Result<Version, ParseError> {
    match version {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        _ => {
            let digits = version
                .strip_prefix("HTTP/")
                .ok_or(ParseError::BadRequest("malformed HTTP version"))?;
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
                Err(ParseError::VersionNotSupported)
            } else {
                Err(ParseError::BadRequest("malformed HTTP version"))
            }
        }
    }
}

/// Split a request target into an optional authority and the origin form.
fn split_target(target: &str) -> Result<(Option<&str>, &str), ParseError> {
    if target.starts_with('/') {
        return Ok((None, target));
    }
    if target == "*" {
        return Err(ParseError::BadRequest("asterisk-form target"));
    }

    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
        .ok_or(ParseError::BadRequest("unsupported request target"))?;
    match rest.find('/') {
        Some(idx) => Ok((Some(&rest[..idx]), &rest[idx..])),
        None => Ok((Some(rest), "/")),
    }
}

/// Lowercase a host and strip any port. IPv6 literals keep their brackets.
fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    let name = if host.starts_with('[') {
        let end = host.find(']')?;
        &host[..=end]
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
            _ => host,
        }
    };
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}
