use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{RelayError, Result};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Produces the chart image for the alert being handled.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn render_chart(&self, dest: &Path) -> Result<()>;
}

/// Uploads an image and returns the provider's media handle.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, image: &Path) -> Result<String>;
}

/// On-disk `{cache key: media_id}` map, so a re-delivered alert reuses the
/// chart that was already uploaded for it.
pub struct MediaCache {
    path: PathBuf,
    picture_dir: PathBuf,
    lock_timeout: Duration,
}

impl MediaCache {
    pub fn new(path: PathBuf, picture_dir: PathBuf, lock_timeout: Duration) -> Self {
        Self {
            path,
            picture_dir,
            lock_timeout,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut lock_path = self.path.as_os_str().to_owned();
        lock_path.push(".lock");
        PathBuf::from(lock_path)
    }

    /// Where the chart for `key` is written before upload.
    pub fn picture_path(&self, key: &str) -> PathBuf {
        self.picture_dir.join(format!("{}.jpg", key))
    }

    /// The file has to exist; a whitespace-only file counts as an empty map.
    pub fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| RelayError::filesystem("Failed to read media cache", &self.path, e))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|source| RelayError::CacheCorrupt {
            path: self.path.clone(),
            source,
        })
    }

    pub fn lookup(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    /// Merge `key -> media_id` into the stored map under an exclusive `flock`
    /// on `<cache>.lock`. The kernel drops the lock when its holder exits, so
    /// a killed run never blocks later ones.
    pub async fn insert(&self, key: &str, media_id: &str) -> Result<()> {
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| RelayError::filesystem("Failed to open media cache lock", &lock_path, e))?;
        let mut lock = fd_lock::RwLock::new(file);

        let started = Instant::now();
        loop {
            match lock.try_write() {
                Ok(_guard) => return self.merge(key, media_id),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(RelayError::filesystem(
                            "Timed out waiting for media cache lock",
                            &lock_path,
                            std::io::Error::new(ErrorKind::TimedOut, "lock held by another run"),
                        ));
                    }
                    debug!(lock = %lock_path.display(), "Media cache lock busy, waiting");
                    sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(RelayError::filesystem("Failed to lock media cache", &lock_path, e))
                }
            }
        }
    }

    fn merge(&self, key: &str, media_id: &str) -> Result<()> {
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), media_id.to_string());
        self.write_entries(&entries)?;
        debug!(key = %key, entries = entries.len(), "Media cache updated");
        Ok(())
    }

    /// Replace the file atomically, keeping its permission bits.
    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let body = serde_json::to_string(entries).map_err(|source| RelayError::CacheCorrupt {
            path: self.path.clone(),
            source,
        })?;
        let permissions = std::fs::metadata(&self.path)
            .map_err(|e| RelayError::filesystem("Failed to stat media cache", &self.path, e))?
            .permissions();

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| RelayError::filesystem("Failed to create temp file for media cache", dir, e))?;
        tmp.write_all(body.as_bytes())
            .and_then(|_| tmp.as_file().set_permissions(permissions))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| RelayError::filesystem("Failed to write media cache", tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| RelayError::filesystem("Failed to replace media cache", &self.path, e.error))?;
        Ok(())
    }

    /// Return the media handle for `key`, rendering and uploading the chart
    /// only when no earlier run stored one. A hit only reads the file; the
    /// lock is taken just for the merge after a fresh upload.
    pub async fn resolve(
        &self,
        key: &str,
        charts: &dyn ChartSource,
        store: &dyn MediaStore,
    ) -> Result<String> {
        if let Some(media_id) = self.lookup(key)? {
            info!(key = %key, media_id = %media_id, "Media cache hit");
            return Ok(media_id);
        }

        info!(key = %key, "Media cache miss, rendering chart");
        let picture = self.picture_path(key);
        charts.render_chart(&picture).await?;
        let media_id = store.upload(&picture).await?;
        self.insert(key, &media_id).await?;
        Ok(media_id)
    }
}
