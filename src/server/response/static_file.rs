//! Static file responses: conditional GET and single byte ranges.

use std::fs::{File, Metadata};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::{self, HeaderValue};
use http::StatusCode;

use super::{Body, Response};
use crate::mime::MimeTable;
use crate::server::request::{ByteRange, Request};

/// Outcome of applying a `Range` header to a file of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResolution {
    Full,
    /// Inclusive byte offsets.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Apply a parsed range to a length.
///
/// Ends past the last byte are clamped. A range starting at or beyond the
/// end, an empty suffix, or any range of an empty file is unsatisfiable.
pub fn resolve_range(range: Option<ByteRange>, len: u64) -> RangeResolution {
    let Some(range) = range else {
        return RangeResolution::Full;
    };
    if len == 0 {
        return RangeResolution::Unsatisfiable;
    }
    let last = len - 1;

    let (start, end) = match range {
        ByteRange::FromTo(a, b) => (a, b.min(last)),
        ByteRange::From(a) => (a, last),
        ByteRange::Suffix(0) => return RangeResolution::Unsatisfiable,
        ByteRange::Suffix(n) => (len.saturating_sub(n), last),
    };
    if start > last {
        return RangeResolution::Unsatisfiable;
    }
    if start == 0 && end == last {
        return RangeResolution::Full;
    }
    RangeResolution::Partial { start, end }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Whether a file with `mtime` is unchanged since the client's copy.
///
/// HTTP dates have second resolution, so the mtime is truncated first.
pub fn not_modified(mtime: SystemTime, since: SystemTime) -> bool {
    unix_secs(mtime) <= unix_secs(since)
}

/// Build the response for an opened regular file.
pub fn serve_file(
    file: File,
    meta: &Metadata,
    path: &Path,
    req: &Request,
    mime: &MimeTable,
    expires: Option<Duration>,
) -> Response {
    let len = meta.len();
    let mtime = meta.modified().ok();

    let mut resp = Response::new(StatusCode::OK);
    resp.headers
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mtime) = mtime {
        if let Ok(v) = HeaderValue::from_str(&httpdate::fmt_http_date(mtime)) {
            resp.headers.insert(header::LAST_MODIFIED, v);
        }
    }
    if let Some(max_age) = expires {
        if let Ok(v) = HeaderValue::from_str(&format!("max-age={}", max_age.as_secs())) {
            resp.headers.insert(header::CACHE_CONTROL, v);
        }
        if let Ok(v) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now() + max_age)) {
            resp.headers.insert(header::EXPIRES, v);
        }
    }

    if let (Some(mtime), Some(since)) = (mtime, req.if_modified_since) {
        if not_modified(mtime, since) {
            resp.status = StatusCode::NOT_MODIFIED;
            return resp;
        }
    }

    if let Ok(v) = HeaderValue::from_str(mime.lookup(path)) {
        resp.headers.insert(header::CONTENT_TYPE, v);
    }

    match resolve_range(req.range, len) {
        RangeResolution::Full => {
            resp.body = Body::File {
                file,
                offset: 0,
                len,
            };
        }
        RangeResolution::Partial { start, end } => {
            resp.status = StatusCode::PARTIAL_CONTENT;
            if let Ok(v) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, len)) {
                resp.headers.insert(header::CONTENT_RANGE, v);
            }
            resp.body = Body::File {
                file,
                offset: start,
                len: end - start + 1,
            };
        }
        RangeResolution::Unsatisfiable => {
            resp.status = StatusCode::RANGE_NOT_SATISFIABLE;
            resp.headers.remove(header::CONTENT_TYPE);
            if let Ok(v) = HeaderValue::from_str(&format!("bytes */{}", len)) {
                resp.headers.insert(header::CONTENT_RANGE, v);
            }
        }
    }

    resp
}
