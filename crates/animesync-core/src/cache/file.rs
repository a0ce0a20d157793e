// # File Cache Backend
//
// One JSON file per namespace and key:
//
// ```text
// <root>/<namespace>/<escaped key>.json
// ```
//
// ```json
// { "key": "anilist_trending", "fetchedAt": "...", "ttlSeconds": 86400, "value": [...] }
// ```
//
// A missing file is a miss. A file that does not parse is reported as
// `CacheCorrupt`, which the `CacheStore` treats as a miss as well. Writes
// go through the same temp-then-rename path as the stores.
//
// Clearing removes files one by one. A failed removal is counted and the
// rest continue; a failed directory listing is counted and ends the clear,
// keeping what was already removed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::{Stream, StreamExt};

use crate::cache::{CacheEntry, CacheNamespace};
use crate::error::{Error, Result};
use crate::persist;
use crate::traits::{CacheBackend, ClearReport};

#[derive(Debug, Clone)]
pub struct FileCacheBackend {
    root: PathBuf,
}

impl FileCacheBackend {
    /// Use `root` as the cache directory; it is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: CacheNamespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    fn entry_path(&self, namespace: CacheNamespace, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", escape_key(key)))
    }
}

/// Make a key safe to use as a file name
///
/// ASCII alphanumerics, `-`, `_` and `.` pass through; every other byte is
/// written as `%XX`.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    if out.starts_with('.') {
        out.replace_range(0..1, "%2E");
    }
    out
}

#[async_trait]
impl CacheBackend for FileCacheBackend {
    async fn read(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CacheEntry<serde_json::Value>>> {
        let path = self.entry_path(namespace, key);
        persist::read_json(&path).await
    }

    async fn write(
        &self,
        namespace: CacheNamespace,
        entry: &CacheEntry<serde_json::Value>,
    ) -> Result<()> {
        let path = self.entry_path(namespace, &entry.key);
        persist::write_json(&path, entry, false).await
    }

    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<bool> {
        let path = self.entry_path(namespace, key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn clear(&self, namespace: CacheNamespace) -> Result<ClearReport> {
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ClearReport::default());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let paths = ReadDirStream::new(entries).map(|entry| entry.map(|e| e.path()));
        Ok(remove_listed(paths).await)
    }
}

async fn remove_listed<S>(paths: S) -> ClearReport
where
    S: Stream<Item = std::io::Result<PathBuf>>,
{
    tokio::pin!(paths);
    let mut report = ClearReport::default();

    while let Some(next) = paths.next().await {
        let path = match next {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Failed to list cache directory: {}", e);
                report.failed += 1;
                break;
            }
        };
        match fs::remove_file(&path).await {
            Ok(()) => report.removed += 1,
            Err(e) => {
                tracing::warn!("Failed to remove cache file {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    report
}
