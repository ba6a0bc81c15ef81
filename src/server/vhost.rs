//! Virtual host table.
//!
//! Each subdirectory of the document root whose name looks like a hostname
//! serves requests for that host. The table is built once before chroot and
//! stores names relative to the root, so it stays valid once the root
//! becomes `/`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct VirtualHostMap {
    hosts: HashMap<String, Arc<str>>,
    enabled: bool,
}

impl VirtualHostMap {
    /// Map that never matches; every request uses the document root.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Scan `root` for host directories.
    pub fn scan(root: &Path) -> io::Result<Self> {
        let mut hosts = HashMap::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_hostname(&name) {
                continue;
            }
            debug!(host = %name, "Virtual host");
            hosts.insert(name.to_ascii_lowercase(), Arc::from(name.as_str()));
        }
        info!(count = hosts.len(), "Virtual hosts loaded");
        Ok(Self {
            hosts,
            enabled: true,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Subdirectory for a lowercased host, if one is configured.
    pub fn resolve(&self, host: &str) -> Option<&Arc<str>> {
        if !self.enabled {
            return None;
        }
        self.hosts.get(host)
    }
}

fn is_hostname(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
}
