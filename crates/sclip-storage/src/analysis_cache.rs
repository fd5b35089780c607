//! Content-addressed analysis cache.
//!
//! Each entry is a JSON file `<dir>/<cache_key>_analysis.json`. Writes go to
//! a uniquely named temp file in the same directory and are renamed into
//! place, so readers never see a partial entry and concurrent saves of one
//! key resolve as last-writer-wins.
//!
//! Key derivation hashes, in order:
//! `video_hash | context | topics | profile | transcript_len`, each field
//! length-prefixed so no separator inside a value can shift it into the next.
//! Topics are trimmed, lower-cased, de-duplicated and sorted first, so the
//! same topic set in any order or casing yields the same key. The context
//! is trimmed but stays case-sensitive.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use sclip_models::{CacheEntry, CacheEntryMeta, OutputProfile};

use crate::error::{StorageError, StorageResult};

/// Default maximum entry age before eviction.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

const ENTRY_SUFFIX: &str = "_analysis.json";

/// Derived cache key: lowercase SHA-256 hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a key supplied from outside (e.g. an admin request).
    pub fn parse(s: &str) -> StorageResult<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(StorageError::invalid_key(s));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical topic form used for hashing.
pub fn canonical_topics<S: AsRef<str>>(topics: &[S]) -> Vec<String> {
    let mut out: Vec<String> = topics
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Durable analysis cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    dir: PathBuf,
    max_age: chrono::Duration,
}

impl AnalysisCache {
    /// Open (creating if needed) a cache directory with the default max age.
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::config_error(format!("{}: {}", dir.display(), e))
        })?;
        info!(dir = %dir.display(), "Analysis cache opened");
        Ok(Self {
            dir,
            max_age: chrono::Duration::days(DEFAULT_MAX_AGE_DAYS),
        })
    }

    /// Override the eviction age.
    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_age(&self) -> chrono::Duration {
        self.max_age
    }

    /// Derive the cache key for an analysis request.
    pub fn key<S: AsRef<str>>(
        video_hash: &str,
        context: &str,
        topics: &[S],
        profile: OutputProfile,
        transcript_len: usize,
    ) -> CacheKey {
        let topics = canonical_topics(topics);
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, video_hash);
        hash_field(&mut hasher, context.trim());
        hasher.update((topics.len() as u64).to_be_bytes());
        for topic in &topics {
            hash_field(&mut hasher, topic);
        }
        hash_field(&mut hasher, profile.as_str());
        hasher.update((transcript_len as u64).to_be_bytes());
        CacheKey(format!("{:x}", hasher.finalize()))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, ENTRY_SUFFIX))
    }

    /// Load an entry. Missing, unreadable, corrupt or expired entries are a miss;
    /// corrupt and expired files are removed.
    pub async fn load(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.entry_path(key.as_str());
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, "Analysis cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Analysis cache read failed, treating as miss");
                return None;
            }
        };

        match decode_entry(key.as_str(), &data) {
            Ok(entry) if entry.timestamp < Utc::now() - self.max_age => {
                debug!(key = %key, timestamp = %entry.timestamp, "Expired analysis cache entry, treating as miss");
                self.discard(key, &path).await;
                None
            }
            Ok(entry) => {
                debug!(key = %key, clips = entry.clip_count, "Analysis cache hit");
                Some(entry)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt analysis cache entry, treating as miss");
                self.discard(key, &path).await;
                None
            }
        }
    }

    async fn discard(&self, key: &CacheKey, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to remove stale cache entry"),
        }
    }

    /// Persist an entry atomically, then evict expired entries.
    ///
    /// Eviction problems are logged and never fail the save.
    pub async fn save(&self, entry: &CacheEntry) -> StorageResult<()> {
        let key = CacheKey::parse(&entry.cache_key)?;
        let bytes = serde_json::to_vec_pretty(entry)?;
        self.write_atomic(key.as_str(), &bytes).await?;
        info!(key = %key, clips = entry.clip_count, "Analysis cached");

        match self.evict_expired().await {
            Ok(0) => {}
            Ok(n) => info!(evicted = n, "Evicted expired analysis cache entries"),
            Err(e) => warn!(error = %e, "Analysis cache eviction failed"),
        }
        Ok(())
    }

    async fn write_atomic(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let final_path = self.entry_path(key);
        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StorageError::write_failed(format!("{}: {}", tmp_path.display(), e)));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StorageError::write_failed(format!("{}: {}", final_path.display(), e)));
        }
        Ok(())
    }

    /// Delete one entry. Returns whether it existed.
    pub async fn delete(&self, key: &CacheKey) -> StorageResult<bool> {
        match tokio::fs::remove_file(self.entry_path(key.as_str())).await {
            Ok(()) => {
                info!(key = %key, "Analysis cache entry deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", key, e))),
        }
    }

    /// Metadata for every readable entry, newest first.
    pub async fn list(&self) -> StorageResult<Vec<CacheEntryMeta>> {
        let mut metas = Vec::new();
        for (key, path) in self.entry_files().await? {
            match read_entry(&key, &path).await {
                Ok((entry, size)) => metas.push(entry.meta(size)),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable cache entry"),
            }
        }
        metas.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.cache_key.cmp(&b.cache_key))
        });
        Ok(metas)
    }

    /// Remove every entry, corrupt ones included. Returns the count removed.
    pub async fn clear(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for (key, path) in self.entry_files().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::delete_failed(format!("{}: {}", key, e))),
            }
        }
        info!(removed, "Analysis cache cleared");
        Ok(removed)
    }

    /// Remove entries older than the max age. Returns the count removed.
    pub async fn evict_expired(&self) -> StorageResult<usize> {
        self.evict_older_than(Utc::now() - self.max_age).await
    }

    async fn evict_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut removed = 0;
        for (key, path) in self.entry_files().await? {
            let entry = match read_entry(&key, &path).await {
                Ok((entry, _)) => entry,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping corrupt cache entry during eviction");
                    continue;
                }
            };
            if entry.timestamp >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(key = %key, timestamp = %entry.timestamp, "Evicted cache entry");
                    removed += 1;
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to evict cache entry"),
            }
        }
        Ok(removed)
    }

    /// `(key, path)` for every entry file in the directory.
    async fn entry_files(&self) -> StorageResult<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(ENTRY_SUFFIX) {
                files.push((key.to_string(), item.path()));
            }
        }
        Ok(files)
    }
}

fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

async fn read_entry(key: &str, path: &Path) -> StorageResult<(CacheEntry, u64)> {
    let data = tokio::fs::read(path).await?;
    let entry = decode_entry(key, &data)?;
    Ok((entry, data.len() as u64))
}

fn decode_entry(key: &str, data: &[u8]) -> StorageResult<CacheEntry> {
    let entry: CacheEntry =
        serde_json::from_slice(data).map_err(|e| StorageError::corrupt(key, e.to_string()))?;
    if entry.cache_key != key {
        return Err(StorageError::corrupt(
            key,
            format!("stored key {} does not match file name", entry.cache_key),
        ));
    }
    if entry.clip_count != entry.clips.len() {
        return Err(StorageError::corrupt(key, "clip count mismatch"));
    }
    Ok(entry)
}
