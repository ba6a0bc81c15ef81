//! HTML directory listing rendering.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped in listing hrefs.
const HREF_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\'')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

struct Entry {
    name: String,
    is_dir: bool,
    size: Option<u64>,
    modified: Option<SystemTime>,
}

/// Read `dir` and render an HTML listing titled with `url_path`.
///
/// Entries are sorted by name. Links are relative to `url_path`, which is
/// expected to end with `/`.
pub fn render(dir: &Path, url_path: &str) -> io::Result<Bytes> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // Follow symlinks, fall back to the link itself when dangling
        let meta = fs::metadata(entry.path()).or_else(|_| entry.metadata());
        let (is_dir, size, modified) = match meta {
            Ok(m) => (m.is_dir(), (!m.is_dir()).then(|| m.len()), m.modified().ok()),
            Err(_) => (false, None, None),
        };
        entries.push(Entry {
            name,
            is_dir,
            size,
            modified,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let title = html_escape(url_path);
    let mut html = String::with_capacity(512 + entries.len() * 128);
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Index of {title}</title>\n</head>\n<body>\n<h1>Index of {title}</h1>\n<table>\n<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n"
    );

    if url_path != "/" {
        html.push_str("<tr><td><a href=\"../\">../</a></td><td></td><td>-</td></tr>\n");
    }

    for entry in &entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        let modified = entry
            .modified
            .map(httpdate::fmt_http_date)
            .unwrap_or_default();
        let size = entry
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            html,
            "<tr><td><a href=\"{href}{suffix}\">{name}{suffix}</a></td><td>{modified}</td><td>{size}</td></tr>",
            href = utf8_percent_encode(&entry.name, HREF_ESCAPE),
            name = html_escape(&entry.name),
        );
    }

    let _ = write!(
        html,
        "</table>\n<hr>\n<address>tokio_webfs/{}</address>\n</body>\n</html>\n",
        crate::PKG_VERSION
    );

    Ok(Bytes::from(html))
}

/// Escape text for HTML element content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
