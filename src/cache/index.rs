use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CacheError;

/// Name of the index file inside the cache directory.
pub(crate) const INDEX_FILE: &str = "index.json";

/// Extension of cached content files.
pub(crate) const CONTENT_EXT: &str = "html";

/// Stable cache key for an article identity: SHA-256, lowercase hex.
pub fn cache_key(article_id: &str) -> String {
    sha256_hex(article_id.as_bytes())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `true` for a 64-character lowercase hex string, the shape of every key.
pub(crate) fn is_key(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Metadata for one cached file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub cached_at: DateTime<Utc>,
    /// Byte length of the stored HTML
    pub size: u64,
    /// SHA-256 hex of the stored HTML
    pub content_hash: String,
}

/// Every entry plus the running size total.
///
/// `total_size` always equals the sum of entry sizes; the mutators below are
/// the only way entries change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadataIndex {
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
    last_cleanup: Option<DateTime<Utc>>,
}

impl CacheMetadataIndex {
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.last_cleanup
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Insert or replace an entry, returning the one it replaced.
    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.total_size = self.total_size.saturating_add(entry.size);
        let previous = self.entries.insert(entry.key.clone(), entry);
        if let Some(ref old) = previous {
            self.total_size = self.total_size.saturating_sub(old.size);
        }
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if let Some(ref entry) = removed {
            self.total_size = self.total_size.saturating_sub(entry.size);
        }
        removed
    }

    pub fn touch(&mut self, key: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.cached_at = at;
        }
    }

    pub fn mark_cleanup(&mut self, at: DateTime<Utc>) {
        self.last_cleanup = Some(at);
    }

    /// Keys of entries cached strictly before `cutoff`.
    pub fn older_than(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.cached_at < cutoff)
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Entries ordered oldest first, ties broken by key.
    pub fn oldest_first(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.key.cmp(&b.key)));
        entries
    }

    /// Re-derive `total_size` from the entries.
    pub fn recompute_total(&mut self) {
        self.total_size = self.entries.values().map(|entry| entry.size).sum();
    }

    /// Load the index at `path`. A missing file is an empty index; an
    /// unreadable or corrupt one is logged and also treated as empty, since
    /// reconciliation rebuilds consistency from the directory.
    pub async fn load(path: &Path) -> Self {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read cache index, starting empty");
                return Self::default();
            }
        };

        match serde_json::from_slice::<Self>(&bytes) {
            Ok(mut index) => {
                index.recompute_total();
                index
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt cache index, starting empty");
                Self::default()
            }
        }
    }

    /// Rewrite the index file atomically (temp file + rename).
    pub async fn persist(&self, path: &Path) -> Result<(), CacheError> {
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| CacheError::WriteFailure(e.to_string()))?;
        write_atomically(path, &json).await
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let temp_path = stage(path, bytes).await?;
    commit(&temp_path, path).await
}

/// Write `bytes` to the temp sibling of `path` and return the temp path.
/// `path` itself is not touched until [`commit`].
pub(crate) async fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf, CacheError> {
    let temp_path = path.with_extension("tmp");
    if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(write_failure(path, e));
    }
    Ok(temp_path)
}

/// Rename a staged temp file over `path`. The temp file is removed on error.
pub(crate) async fn commit(temp_path: &Path, path: &Path) -> Result<(), CacheError> {
    if let Err(e) = tokio::fs::rename(temp_path, path).await {
        let _ = tokio::fs::remove_file(temp_path).await;
        return Err(write_failure(path, e));
    }
    Ok(())
}

fn write_failure(path: &Path, e: std::io::Error) -> CacheError {
    CacheError::WriteFailure(format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn entry(key: &str, size: u64, at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            cached_at: at,
            size,
            content_hash: sha256_hex(key.as_bytes()),
        }
    }

    #[test]
    fn test_cache_key_is_stable_hex() {
        let key = cache_key("https://example.com/article/1");
        assert_eq!(key, cache_key("https://example.com/article/1"));
        assert_ne!(key, cache_key("https://example.com/article/2"));
        assert!(is_key(&key));
        assert!(!is_key("index"));
        assert!(!is_key(&key.to_uppercase()));
    }

    #[test]
    fn test_insert_replace_and_remove_track_total() {
        let now = Utc::now();
        let mut index = CacheMetadataIndex::default();

        assert!(index.insert(entry("a", 10, now)).is_none());
        index.insert(entry("b", 5, now));
        assert_eq!(index.total_size(), 15);

        let old = index.insert(entry("a", 3, now)).unwrap();
        assert_eq!(old.size, 10);
        assert_eq!(index.total_size(), 8);

        index.remove("b");
        index.remove("missing");
        assert_eq!(index.total_size(), 3);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_older_than_and_oldest_first() {
        let now = Utc::now();
        let mut index = CacheMetadataIndex::default();
        index.insert(entry("new", 1, now));
        index.insert(entry("old", 1, now - Duration::hours(5)));
        index.insert(entry("mid", 1, now - Duration::hours(2)));

        let mut stale = index.older_than(now - Duration::hours(1));
        stale.sort();
        assert_eq!(stale, vec!["mid".to_string(), "old".to_string()]);

        let order: Vec<_> = index.oldest_first().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(order, vec!["old", "mid", "new"]);
    }

    #[tokio::test]
    async fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);

        let mut index = CacheMetadataIndex::default();
        index.insert(entry("a", 7, Utc::now()));
        index.mark_cleanup(Utc::now());
        index.persist(&path).await.unwrap();

        assert_eq!(CacheMetadataIndex::load(&path).await, index);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_or_corrupt_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        assert!(CacheMetadataIndex::load(&path).await.is_empty());

        std::fs::write(&path, b"{ not json").unwrap();
        assert!(CacheMetadataIndex::load(&path).await.is_empty());
    }
}
