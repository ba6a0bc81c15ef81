//! Error page bodies.
//!
//! Custom pages are loaded from a directory at startup, before chroot, and
//! served for 4xx/5xx responses. Other codes get a small built-in page.

use bytes::Bytes;
use http::StatusCode;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache of custom error pages loaded at startup.
#[derive(Clone, Default)]
pub struct ErrorPages {
    /// Map of status code -> HTML content
    pages: Arc<HashMap<u16, Bytes>>,
}

impl ErrorPages {
    /// Create an empty error pages cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load error pages from a directory.
    ///
    /// Scans the directory for files matching `{status_code}.html` pattern
    /// (e.g., `404.html`, `500.html`) and caches them in memory.
    pub fn from_directory(path: &Path) -> Self {
        if !path.is_dir() {
            warn!("Error pages directory not found: {}", path.display());
            return Self::new();
        }

        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read error pages directory: {}", e);
                return Self::new();
            }
        };

        let mut pages = HashMap::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let file_path = entry.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }

            let status_code: u16 = match file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
            {
                Some(code) if (400..600).contains(&code) => code,
                _ => continue,
            };

            match std::fs::read(&file_path) {
                Ok(content) => {
                    debug!(
                        "Loaded error page: {} ({} bytes)",
                        file_path.display(),
                        content.len()
                    );
                    pages.insert(status_code, Bytes::from(content));
                }
                Err(e) => {
                    warn!("Failed to read error page {}: {}", file_path.display(), e);
                }
            }
        }

        if !pages.is_empty() {
            let mut codes: Vec<_> = pages.keys().copied().collect();
            codes.sort_unstable();
            info!("Loaded {} error pages: {:?}", pages.len(), codes);
        }

        Self {
            pages: Arc::new(pages),
        }
    }

    /// Get the custom page for a status code, if available.
    #[inline]
    pub fn get(&self, status_code: u16) -> Option<&Bytes> {
        self.pages.get(&status_code)
    }

    /// Custom page when present, built-in page otherwise.
    pub fn body(&self, status: StatusCode) -> Bytes {
        match self.get(status.as_u16()) {
            Some(page) => page.clone(),
            None => builtin_page(status),
        }
    }
}

fn builtin_page(status: StatusCode) -> Bytes {
    let reason = status.canonical_reason().unwrap_or("Error");
    Bytes::from(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{code} {reason}</title></head>\n<body>\n<h1>{code} {reason}</h1>\n<hr>\n<address>tokio_webfs/{version}</address>\n</body>\n</html>\n",
        code = status.as_u16(),
        reason = reason,
        version = crate::PKG_VERSION,
    ))
}
