//! Response cache port and its on-disk implementation.
//!
//! The generation client receives a `CacheStore` at construction and never
//! touches the filesystem itself. Keys are hex fingerprints, values are the raw
//! response text. Entries never expire; `clear` is the only eviction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("cache key '{0}' is not a hex fingerprint")]
  InvalidKey(String),
  #[error("cache I/O error at {path}: {source}")]
  Io { path: PathBuf, #[source] source: std::io::Error },
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait CacheStore: Send + Sync {
  async fn get(&self, key: &str) -> CacheResult<Option<String>>;
  async fn set(&self, key: &str, value: &str) -> CacheResult<()>;
  /// Remove every entry. Returns how many were removed.
  async fn clear(&self) -> CacheResult<usize>;
  /// Release the store. Nothing may be read or written afterwards.
  async fn close(&self) -> CacheResult<()> {
    Ok(())
  }
}

const ENTRY_EXT: &str = "txt";

/// One file per entry: `<dir>/<key>.txt`. Writes go through a uniquely named
/// temp file and a rename, so a crashed write never leaves a torn entry.
#[derive(Debug)]
pub struct DiskCache {
  dir: PathBuf,
}

impl DiskCache {
  /// Open (creating if needed) the cache directory.
  #[instrument(level = "debug")]
  pub async fn open(dir: &Path) -> CacheResult<Self> {
    fs::create_dir_all(dir).await.map_err(|source| CacheError::Io { path: dir.to_path_buf(), source })?;
    debug!(target: "homework_gen", dir = %dir.display(), "Opened response cache");
    Ok(Self { dir: dir.to_path_buf() })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn entry_path(&self, key: &str) -> CacheResult<PathBuf> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(self.dir.join(format!("{key}.{ENTRY_EXT}")))
  }
}

#[async_trait]
impl CacheStore for DiskCache {
  async fn get(&self, key: &str) -> CacheResult<Option<String>> {
    let path = self.entry_path(key)?;
    match fs::read_to_string(&path).await {
      Ok(text) => Ok(Some(text)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(CacheError::Io { path, source }),
    }
  }

  async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
    let path = self.entry_path(key)?;
    let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));
    fs::write(&tmp, value).await.map_err(|source| CacheError::Io { path: tmp.clone(), source })?;
    fs::rename(&tmp, &path).await.map_err(|source| CacheError::Io { path: path.clone(), source })
  }

  async fn clear(&self) -> CacheResult<usize> {
    let io = |source| CacheError::Io { path: self.dir.clone(), source };
    let mut removed = 0;
    let mut entries = fs::read_dir(&self.dir).await.map_err(io)?;
    while let Some(entry) = entries.next_entry().await.map_err(io)? {
      let path = entry.path();
      let is_entry = path.extension().map(|e| e == ENTRY_EXT).unwrap_or(false);
      let is_tmp = path.extension().map(|e| e == "tmp").unwrap_or(false);
      if is_entry || is_tmp {
        fs::remove_file(&path).await.map_err(|source| CacheError::Io { path: path.clone(), source })?;
        if is_entry {
          removed += 1;
        }
      }
    }
    debug!(target: "homework_gen", removed, "Cleared response cache");
    Ok(removed)
  }

  async fn close(&self) -> CacheResult<()> {
    debug!(target: "homework_gen", dir = %self.dir.display(), "Closed response cache");
    Ok(())
  }
}

/// In-process store, used to exercise the client without touching disk.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryCache {
  entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryCache {
  pub fn len(&self) -> usize {
    self.entries.lock().unwrap().len()
  }
}

#[cfg(test)]
#[async_trait]
impl CacheStore for MemoryCache {
  async fn get(&self, key: &str) -> CacheResult<Option<String>> {
    Ok(self.entries.lock().unwrap().get(key).cloned())
  }

  async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
    self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
    Ok(())
  }

  async fn clear(&self) -> CacheResult<usize> {
    let mut map = self.entries.lock().unwrap();
    let n = map.len();
    map.clear();
    Ok(n)
  }
}
