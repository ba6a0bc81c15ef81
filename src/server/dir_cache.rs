//! Directory listing cache.
//!
//! Rendered listings are kept per directory and revalidated on every lookup:
//! an entry serves only while it is younger than the TTL and the directory's
//! mtime still matches the one recorded at render time. Rendering happens
//! outside the lock, so two workers missing on the same directory may both
//! render; the later insert wins.
//!
//! A directory's mtime changes when entries are added, removed or renamed,
//! not when an existing file is rewritten in place. Cached sizes and dates of
//! such files stay stale until the TTL runs out.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use tracing::debug;

use super::listing;

type CacheKey = (PathBuf, Box<str>);

/// One rendered listing.
#[derive(Debug, Clone)]
struct CachedDirectory {
    body: Bytes,
    /// Directory mtime when `body` was rendered
    mtime: SystemTime,
    inserted: Instant,
    last_access: Instant,
}

/// Shared LRU cache of rendered directory listings.
pub struct DirCache {
    entries: Mutex<HashMap<CacheKey, CachedDirectory>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl DirCache {
    /// Create a cache. A `None` TTL or zero capacity renders every request.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity.min(1024))),
            capacity,
            ttl,
        }
    }

    fn enabled(&self) -> bool {
        self.capacity > 0 && self.ttl.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedDirectory>> {
        // A panic mid-insert leaves the map structurally valid
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the listing for `dir` served as `url_path`.
    ///
    /// The boolean is true on a cache hit. Errors reading the directory are
    /// returned to the caller and leave the cache untouched.
    pub fn lookup_or_render(&self, dir: &Path, url_path: &str) -> io::Result<(Bytes, bool)> {
        let mtime = fs::metadata(dir)?.modified()?;

        if !self.enabled() {
            return Ok((listing::render(dir, url_path)?, false));
        }

        let key: CacheKey = (dir.to_path_buf(), url_path.into());
        let now = Instant::now();
        if let Some(body) = self.fresh(&key, mtime, now) {
            return Ok((body, true));
        }

        let body = listing::render(dir, url_path)?;
        self.insert(key, body.clone(), mtime, now);
        debug!(dir = %dir.display(), bytes = body.len(), "Rendered directory listing");
        Ok((body, false))
    }

    fn fresh(&self, key: &CacheKey, mtime: SystemTime, now: Instant) -> Option<Bytes> {
        let ttl = self.ttl?;
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        if now.saturating_duration_since(entry.inserted) < ttl && entry.mtime == mtime {
            entry.last_access = now;
            Some(entry.body.clone())
        } else {
            None
        }
    }

    fn insert(&self, key: CacheKey, body: Bytes, mtime: SystemTime, now: Instant) {
        let mut entries = self.lock();

        if !entries.contains_key(&key) {
            while entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        entries.remove(&k);
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            key,
            CachedDirectory {
                body,
                mtime,
                inserted: now,
                last_access: now,
            },
        );
    }

    /// Number of cached listings.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
