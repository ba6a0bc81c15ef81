//! MIME type resolution.
//!
//! The table is loaded once from a `mime.types` file before chroot. Lookups
//! fall back to `mime_guess`'s built-in table, then to the configured default.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

/// Extension to content-type table.
#[derive(Debug, Clone)]
pub struct MimeTable {
    by_extension: HashMap<String, String>,
    default_type: String,
}

impl MimeTable {
    /// Empty table, builtin guesses only.
    pub fn new(default_type: impl Into<String>) -> Self {
        Self {
            by_extension: HashMap::new(),
            default_type: default_type.into(),
        }
    }

    /// Load a `mime.types` file.
    pub fn load(path: &Path, default_type: impl Into<String>) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let table = Self::parse(&contents, default_type);
        debug!(
            path = %path.display(),
            entries = table.len(),
            "Loaded MIME table"
        );
        Ok(table)
    }

    /// Parse `mime.types` syntax: `type/subtype ext ext ...`, `#` comments.
    ///
    /// The first definition of an extension wins.
    pub fn parse(contents: &str, default_type: impl Into<String>) -> Self {
        let mut table = Self::new(default_type);

        for line in contents.lines() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let mut fields = line.split_whitespace();
            let Some(mime) = fields.next() else {
                continue;
            };
            if !mime.contains('/') {
                continue;
            }
            for ext in fields {
                table
                    .by_extension
                    .entry(ext.to_ascii_lowercase())
                    .or_insert_with(|| mime.to_string());
            }
        }

        table
    }

    /// Number of extensions in the loaded table.
    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }

    /// Content type for a file path.
    pub fn lookup<'a>(&'a self, path: &Path) -> &'a str {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return &self.default_type;
        };

        let lowered = ext.to_ascii_lowercase();
        if let Some(mime) = self.by_extension.get(&lowered) {
            return mime;
        }

        mime_guess::from_ext(&lowered)
            .first_raw()
            .unwrap_or(self.default_type.as_str())
    }

    pub fn default_type(&self) -> &str {
        &self.default_type
    }
}
