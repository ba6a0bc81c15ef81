//! CGI response header block.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use memchr::memchr_iter;

use super::CgiError;

/// Largest header block accepted from a script.
pub const MAX_CGI_HEAD: usize = 8192;

/// Headers a script may not set on the client connection.
const HOP_BY_HOP: [HeaderName; 3] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    HeaderName::from_static("keep-alive"),
];

#[derive(Debug)]
pub struct CgiHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Parse the header block at the start of `buf`.
///
/// Returns the head and the number of bytes it occupied, or `None` while
/// the blank line ending it has not arrived yet.
pub fn parse_head(buf: &[u8]) -> Result<Option<(CgiHead, usize)>, CgiError> {
    let Some(end) = head_end(buf) else {
        if buf.len() > MAX_CGI_HEAD {
            return Err(CgiError::MalformedOutput("header block too large"));
        }
        return Ok(None);
    };

    let mut status = None;
    let mut headers = HeaderMap::new();
    for line in buf[..end].split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let colon = memchr::memchr(b':', line)
            .ok_or(CgiError::MalformedOutput("header line without colon"))?;
        let name = HeaderName::from_bytes(&line[..colon])
            .map_err(|_| CgiError::MalformedOutput("invalid header name"))?;
        let value = line[colon + 1..].trim_ascii();

        if name.as_str() == "status" {
            status = Some(parse_status(value)?);
            continue;
        }
        if HOP_BY_HOP.contains(&name) {
            continue;
        }
        let value = HeaderValue::from_bytes(value)
            .map_err(|_| CgiError::MalformedOutput("invalid header value"))?;
        headers.append(name, value);
    }

    let status = match status {
        Some(s) => s,
        None if headers.contains_key(header::LOCATION) => StatusCode::FOUND,
        None if headers.contains_key(header::CONTENT_TYPE) => StatusCode::OK,
        None => return Err(CgiError::MalformedOutput("no Content-Type, Location or Status")),
    };

    Ok(Some((CgiHead { status, headers }, end)))
}

fn head_end(buf: &[u8]) -> Option<usize> {
    for i in memchr_iter(b'\n', buf) {
        if i >= 1 && buf[i - 1] == b'\n' {
            return Some(i + 1);
        }
        if i >= 2 && buf[i - 1] == b'\r' && buf[i - 2] == b'\n' {
            return Some(i + 1);
        }
    }
    None
}

fn parse_status(value: &[u8]) -> Result<StatusCode, CgiError> {
    let code = value
        .get(..3)
        .ok_or(CgiError::MalformedOutput("short Status header"))?;
    StatusCode::from_bytes(code).map_err(|_| CgiError::MalformedOutput("invalid Status header"))
}
