//! Durable file-backed cache.
//!
//! One JSON document per key under a single directory. Writes go to a hidden
//! temp file in the same directory and are renamed into place, so a reader sees
//! either the previous entry or the complete new one.

use async_trait::async_trait;
use chrono::Utc;
use screener_core::{
    CacheCategory, CacheEntry, CacheKey, CacheStats, RecordCache, Result, ScreenError, TtlPolicy,
};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument, trace, warn};

use crate::key::file_stem;

const ENTRY_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

/// Temp files older than this are leftovers of interrupted writes.
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

/// File-backed cache with atomic writes and lazy expiry.
///
/// Expired and undecodable entries are deleted when a read encounters them.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
    ttl: TtlPolicy,
}

impl FileCache {
    /// Opens (creating if necessary) a cache rooted at `dir`.
    ///
    /// # Errors
    /// Returns [`ScreenError::Cache`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, &e))?;
        Ok(Self {
            dir,
            ttl: TtlPolicy::default(),
        })
    }

    /// Replaces the expiry policy.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file an entry for `key` is stored in.
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", file_stem(key)))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(PathBuf, TtlPolicy) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let dir = self.dir.clone();
        let ttl = self.ttl;
        tokio::task::spawn_blocking(move || f(dir, ttl))
            .await
            .map_err(|e| ScreenError::Cache(format!("cache task failed: {e}")))?
    }
}

/// Result of decoding one entry file.
enum Decoded {
    Missing,
    Corrupt(String),
    Entry(CacheEntry),
}

fn io_error(path: &Path, e: &io::Error) -> ScreenError {
    ScreenError::Cache(format!("{}: {e}", path.display()))
}

fn decode(path: &Path) -> Result<Decoded> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Decoded::Missing),
        Err(e) => return Err(io_error(path, &e)),
    };
    Ok(match serde_json::from_slice::<CacheEntry>(&bytes) {
        Ok(entry) => Decoded::Entry(entry),
        Err(e) => Decoded::Corrupt(e.to_string()),
    })
}

fn remove(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(path, &e)),
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(TEMP_SUFFIX))
}

fn is_entry_file(path: &Path) -> bool {
    !is_temp_file(path) && path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}

fn entry_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for item in fs::read_dir(dir).map_err(|e| io_error(dir, &e))? {
        let path = item.map_err(|e| io_error(dir, &e))?.path();
        if path.is_file() && is_entry_file(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| io_error(dir, &e))?;
    tmp.write_all(bytes).map_err(|e| io_error(tmp.path(), &e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| io_error(tmp.path(), &e))?;
    tmp.persist(path).map_err(|e| io_error(path, &e.error))?;
    Ok(())
}

fn remove_stale_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let now = SystemTime::now();
    for item in fs::read_dir(dir).map_err(|e| io_error(dir, &e))? {
        let path = item.map_err(|e| io_error(dir, &e))?.path();
        if !is_temp_file(&path) {
            continue;
        }
        let stale = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > STALE_TEMP_AGE);
        if stale && remove(&path)? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[async_trait]
impl RecordCache for FileCache {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let key = key.clone();
        self.blocking(move |_, ttl| match decode(&path)? {
            Decoded::Missing => {
                debug!("Cache miss");
                Ok(None)
            }
            Decoded::Corrupt(reason) => {
                warn!(path = %path.display(), %reason, "Deleting corrupt cache entry");
                remove(&path)?;
                Ok(None)
            }
            Decoded::Entry(entry) if entry.key != key => {
                debug!(stored = %entry.key, "Cache file holds a different key");
                Ok(None)
            }
            Decoded::Entry(entry) if ttl.is_expired(&entry, Utc::now()) => {
                debug!(stored_at = %entry.stored_at, "Evicting expired cache entry");
                remove(&path)?;
                Ok(None)
            }
            Decoded::Entry(entry) => {
                debug!(periods = entry.payload.len(), "Cache hit");
                Ok(Some(entry))
            }
        })
        .await
    }

    #[instrument(skip(self, entry), fields(key = %entry.key, category = %entry.category))]
    async fn set(&self, entry: &CacheEntry) -> Result<bool> {
        if entry.category == CacheCategory::Volatile {
            trace!("Volatile entry not stored");
            return Ok(false);
        }
        let bytes = serde_json::to_vec(entry).map_err(|e| ScreenError::Cache(e.to_string()))?;
        let path = self.entry_path(&entry.key);
        self.blocking(move |dir, _| write_atomic(&dir, &path, &bytes))
            .await?;
        debug!(periods = entry.payload.len(), "Cached entry");
        Ok(true)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let path = self.entry_path(key);
        self.blocking(move |_, _| remove(&path)).await
    }

    async fn list_keys(&self) -> Result<Vec<CacheKey>> {
        self.blocking(|dir, _| {
            let mut keys = Vec::new();
            for path in entry_files(&dir)? {
                if let Decoded::Entry(entry) = decode(&path)? {
                    keys.push(entry.key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self) -> Result<usize> {
        let removed = self
            .blocking(|dir, ttl| {
                let now = Utc::now();
                let mut removed = 0;
                for path in entry_files(&dir)? {
                    let stale = match decode(&path)? {
                        Decoded::Missing => false,
                        Decoded::Corrupt(_) => true,
                        Decoded::Entry(entry) => ttl.is_expired(&entry, now),
                    };
                    if stale && remove(&path)? {
                        removed += 1;
                    }
                }
                let temps = remove_stale_temp_files(&dir)?;
                if temps > 0 {
                    debug!(temps, "Removed leftover temp files");
                }
                Ok(removed)
            })
            .await?;
        debug!(removed, "Swept expired cache entries");
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.blocking(|dir, ttl| {
            let now = Utc::now();
            let mut stats = CacheStats::default();
            for path in entry_files(&dir)? {
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                match decode(&path)? {
                    Decoded::Missing => continue,
                    Decoded::Corrupt(_) => stats.expired += 1,
                    Decoded::Entry(entry) if ttl.is_expired(&entry, now) => stats.expired += 1,
                    Decoded::Entry(entry) => {
                        stats.valid += 1;
                        *stats.by_category.entry(entry.category).or_default() += 1;
                    }
                }
                stats.total += 1;
                stats.size_bytes += size;
            }
            Ok(stats)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<usize> {
        self.blocking(|dir, _| {
            let mut removed = 0;
            for path in entry_files(&dir)? {
                if remove(&path)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }
}
