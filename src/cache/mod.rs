//! Content-addressable disk cache for rendered article HTML.
//!
//! Layout: `<dir>/<sha256-hex>.html` per entry plus `<dir>/index.json`.
//!
//! The metadata index is owned by a single spawned task. [`ContentCache`] is a
//! cheap `Clone` handle that sends it commands over an `mpsc` channel and
//! awaits `oneshot` replies, so index mutations never run concurrently.
//! Every mutating command rewrites the index exactly once.
//!
//! ```ignore
//! let cache = ContentCache::open(dir, Arc::new(SystemClock)).await?;
//! cache.put("https://example.com/a", "<p>hi</p>").await?;
//! assert_eq!(cache.get("https://example.com/a").await.as_deref(), Some("<p>hi</p>"));
//! cache.enforce_size_limit(100 * 1024 * 1024).await?;
//! ```

mod index;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use index::{cache_key, CacheEntry, CacheMetadataIndex};
use index::{commit, is_key, sha256_hex, stage, CONTENT_EXT, INDEX_FILE};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache data: {0}")]
    InvalidData(String),

    #[error("cache write failed: {0}")]
    WriteFailure(String),

    /// The owner task has shut down.
    #[error("content cache is unavailable")]
    Unavailable,
}

/// Source of "now" for `cached_at` stamps and age eviction.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_size: u64,
    pub entry_count: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

enum Command {
    Put {
        id: String,
        html: String,
        reply: oneshot::Sender<Result<(), CacheError>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), CacheError>>,
    },
    EvictOlderThan {
        max_age: Duration,
        reply: oneshot::Sender<Result<usize, CacheError>>,
    },
    EnforceSizeLimit {
        limit: u64,
        reply: oneshot::Sender<Result<usize, CacheError>>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), CacheError>>,
    },
}

/// Handle to the cache owner task.
#[derive(Clone)]
pub struct ContentCache {
    tx: mpsc::Sender<Command>,
}

impl ContentCache {
    /// Open (or create) the cache in `dir` and spawn its owner task.
    ///
    /// The stored index is reconciled with the directory first: entries whose
    /// file is gone are dropped, content files without an entry and leftover
    /// temp files are deleted, and the size total is recomputed.
    pub async fn open(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::WriteFailure(format!("{}: {e}", dir.display())))?;

        let mut owner = CacheOwner {
            index: CacheMetadataIndex::load(&dir.join(INDEX_FILE)).await,
            dir,
            clock,
        };
        owner.reconcile().await?;

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(owner.run(rx));
        Ok(Self { tx })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CacheError::Unavailable)?;
        rx.await.map_err(|_| CacheError::Unavailable)
    }

    /// Store `html` for the article `id`, replacing any previous content.
    pub async fn put(&self, id: &str, html: &str) -> Result<(), CacheError> {
        let (id, html) = (id.to_owned(), html.to_owned());
        self.request(|reply| Command::Put { id, html, reply })
            .await?
    }

    /// Cached HTML for `id`, or `None` on a miss.
    ///
    /// Content whose hash no longer matches its entry counts as a miss and is
    /// evicted.
    pub async fn get(&self, id: &str) -> Option<String> {
        let id = id.to_owned();
        match self.request(|reply| Command::Get { id, reply }).await {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(error = %e, "Cache read treated as miss");
                None
            }
        }
    }

    /// Remove every entry and file.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.request(|reply| Command::Clear { reply }).await?
    }

    /// Remove entries cached more than `max_age` ago. Returns how many.
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<usize, CacheError> {
        self.request(|reply| Command::EvictOlderThan { max_age, reply })
            .await?
    }

    /// Remove oldest entries until the total size is at most `limit`.
    /// Returns how many were removed; under the limit nothing changes.
    pub async fn enforce_size_limit(&self, limit: u64) -> Result<usize, CacheError> {
        self.request(|reply| Command::EnforceSizeLimit { limit, reply })
            .await?
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Flush the index and stop the owner task. Later calls on any clone
    /// fail with [`CacheError::Unavailable`].
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        self.request(|reply| Command::Shutdown { reply }).await?
    }
}

/// The task that owns the index.
struct CacheOwner {
    dir: PathBuf,
    index: CacheMetadataIndex,
    clock: Arc<dyn Clock>,
}

impl CacheOwner {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Put { id, html, reply } => {
                    let _ = reply.send(self.put(&id, &html).await);
                }
                Command::Get { id, reply } => {
                    let _ = reply.send(self.get(&id).await);
                }
                Command::Clear { reply } => {
                    let _ = reply.send(self.clear().await);
                }
                Command::EvictOlderThan { max_age, reply } => {
                    let _ = reply.send(self.evict_older_than(max_age).await);
                }
                Command::EnforceSizeLimit { limit, reply } => {
                    let _ = reply.send(self.enforce_size_limit(limit).await);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown { reply } => {
                    let _ = reply.send(self.index.persist(&self.index_path()).await);
                    break;
                }
            }
        }
        tracing::debug!(dir = %self.dir.display(), "Content cache owner exiting");
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn content_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{CONTENT_EXT}"))
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            total_size: self.index.total_size(),
            entry_count: self.index.len(),
            last_cleanup: self.index.last_cleanup(),
        }
    }

    async fn reconcile(&mut self) -> Result<(), CacheError> {
        let before = self.index.clone();
        let mut on_disk = std::collections::HashMap::new();

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::InvalidData(format!("{}: {e}", self.dir.display())))?;
        while let Ok(Some(dirent)) = entries.next_entry().await {
            let path = dirent.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };

            if ext == "tmp" {
                remove_file_logged(&path).await;
            } else if ext == CONTENT_EXT && is_key(stem) {
                let len = dirent.metadata().await.map(|m| m.len()).unwrap_or(0);
                on_disk.insert(stem.to_owned(), len);
            }
        }

        let indexed: Vec<String> = self.index.keys().map(str::to_owned).collect();
        for key in indexed {
            match on_disk.remove(&key) {
                Some(len) => {
                    // The file is authoritative for size
                    if let Some(mut entry) = self.index.remove(&key) {
                        entry.size = len;
                        self.index.insert(entry);
                    }
                }
                None => {
                    tracing::debug!(key = %key, "Dropping cache entry without file");
                    self.index.remove(&key);
                }
            }
        }
        for orphan in on_disk.keys() {
            tracing::debug!(key = %orphan, "Deleting cache file without entry");
            remove_file_logged(&self.content_path(orphan)).await;
        }

        self.index.recompute_total();
        if self.index != before {
            self.index.persist(&self.index_path()).await?;
        }
        tracing::info!(
            dir = %self.dir.display(),
            entries = self.index.len(),
            total_size = self.index.total_size(),
            "Content cache ready"
        );
        Ok(())
    }

    async fn put(&mut self, id: &str, html: &str) -> Result<(), CacheError> {
        if id.trim().is_empty() {
            return Err(CacheError::InvalidData("empty article id".to_owned()));
        }

        let key = cache_key(id);
        let hash = sha256_hex(html.as_bytes());
        let now = self.clock.now();
        let path = self.content_path(&key);

        let unchanged = self
            .index
            .get(&key)
            .is_some_and(|entry| entry.content_hash == hash);
        let mut next = self.index.clone();

        // New content stays in a temp file until the index naming it is saved
        let staged = if unchanged {
            next.touch(&key, now);
            None
        } else {
            let temp_path = stage(&path, html.as_bytes()).await?;
            next.insert(CacheEntry {
                key: key.clone(),
                cached_at: now,
                size: html.len() as u64,
                content_hash: hash,
            });
            Some(temp_path)
        };

        if let Err(e) = next.persist(&self.index_path()).await {
            if let Some(temp_path) = staged {
                remove_file_logged(&temp_path).await;
            }
            return Err(e);
        }

        if let Some(temp_path) = staged {
            if let Err(e) = commit(&temp_path, &path).await {
                if let Err(restore) = self.index.persist(&self.index_path()).await {
                    tracing::warn!(key = %key, error = %restore, "Failed to restore cache index");
                }
                return Err(e);
            }
        }
        self.index = next;
        Ok(())
    }

    async fn get(&mut self, id: &str) -> Option<String> {
        let key = cache_key(id);
        let expected = self.index.get(&key)?.content_hash.clone();

        match tokio::fs::read(self.content_path(&key)).await {
            Ok(bytes) if sha256_hex(&bytes) == expected => match String::from_utf8(bytes) {
                Ok(html) => return Some(html),
                Err(e) => tracing::warn!(key = %key, error = %e, "Cached content is not UTF-8"),
            },
            Ok(_) => tracing::warn!(key = %key, "Cached content hash mismatch, evicting"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Cached file unreadable, evicting"),
        }

        if let Err(e) = self.remove_keys(vec![key], None).await {
            tracing::warn!(error = %e, "Failed to evict corrupt cache entry");
        }
        None
    }

    async fn clear(&mut self) -> Result<(), CacheError> {
        let keys: Vec<String> = self.index.keys().map(str::to_owned).collect();
        let removed = self.remove_keys(keys, None).await?;
        tracing::info!(removed, "Cleared content cache");
        Ok(())
    }

    async fn evict_older_than(&mut self, max_age: Duration) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let cutoff = TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self.index.older_than(cutoff);
        let removed = self.remove_keys(stale, Some(now)).await?;
        tracing::info!(removed, max_age_secs = max_age.as_secs(), "Evicted stale cache entries");
        Ok(removed)
    }

    async fn enforce_size_limit(&mut self, limit: u64) -> Result<usize, CacheError> {
        if self.index.total_size() <= limit {
            return Ok(0);
        }

        let mut total = self.index.total_size();
        let mut victims = Vec::new();
        for entry in self.index.oldest_first() {
            if total <= limit {
                break;
            }
            total = total.saturating_sub(entry.size);
            victims.push(entry.key.clone());
        }

        let removed = self.remove_keys(victims, Some(self.clock.now())).await?;
        tracing::info!(
            removed,
            limit,
            total_size = self.index.total_size(),
            "Enforced cache size limit"
        );
        Ok(removed)
    }

    /// Drop `keys` from the index, persist it, then delete their files.
    ///
    /// The index is written before any file is touched, so a persist failure
    /// leaves both the in-memory index and the directory unchanged. A file
    /// that fails to delete afterwards is an orphan that the next
    /// reconciliation removes.
    async fn remove_keys(
        &mut self,
        keys: Vec<String>,
        cleanup_at: Option<DateTime<Utc>>,
    ) -> Result<usize, CacheError> {
        let mut next = self.index.clone();
        let removed: Vec<String> = keys
            .into_iter()
            .filter(|key| next.remove(key).is_some())
            .collect();
        if let Some(at) = cleanup_at {
            next.mark_cleanup(at);
        }

        next.persist(&self.index_path()).await?;
        self.index = next;

        for key in &removed {
            remove_file_logged(&self.content_path(key)).await;
        }
        Ok(removed.len())
    }
}

async fn remove_file_logged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete cache file");
        }
    }
}
