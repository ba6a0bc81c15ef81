//! Request path normalization and filesystem mapping.

use std::path::{Path, PathBuf};

/// A request path mapped under a document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Normalized URL path, always starting with `/`.
    pub url_path: String,
    /// The request named a directory form (`/` suffix).
    pub trailing_slash: bool,
    /// Location under the document root.
    pub fs_path: PathBuf,
}

/// The path climbs above the document root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traversal;

/// Normalize a decoded request path and join it onto `root`.
///
/// Empty and `.` segments are dropped, `..` removes the previous segment.
/// A `..` with nothing left to remove is rejected rather than clamped.
pub fn resolve(root: &Path, decoded_path: &str) -> Result<ResolvedPath, Traversal> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop().ok_or(Traversal)?;
            }
            s => segments.push(s),
        }
    }

    let trailing_slash = decoded_path.ends_with('/')
        || decoded_path.ends_with("/.")
        || decoded_path.ends_with("/..");

    let mut url_path = String::with_capacity(decoded_path.len() + 1);
    let mut fs_path = root.to_path_buf();
    for segment in &segments {
        url_path.push('/');
        url_path.push_str(segment);
        fs_path.push(segment);
    }
    if segments.is_empty() || trailing_slash {
        url_path.push('/');
    }

    Ok(ResolvedPath {
        url_path,
        trailing_slash: trailing_slash || segments.is_empty(),
        fs_path,
    })
}
