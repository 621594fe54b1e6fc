use crate::cache::{CacheEntry, EntryStore, MemoryStore};
use crate::dataset::Dataset;
use crate::downloader::to_csv;
use crate::error::CacheError;
use crate::loader::from_csv_str;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cache entry persisted as a CSV file.
///
/// The file's modification time is the entry timestamp, so a restart within
/// the TTL serves the saved rows without fetching. Writes go to a temporary
/// file in the same directory that is then renamed over the cache file, on
/// the blocking thread pool. Persistence is best effort: a failed write is
/// logged and the entry is still installed in memory.
pub struct FileStore {
    path: PathBuf,
    memory: MemoryStore,
    // keeps the file and the memory mirror in install order
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open the store, loading an existing cache file if there is one.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let store = Self {
            path: path.into(),
            memory: MemoryStore::new(),
            write_lock: tokio::sync::Mutex::new(()),
        };
        match load_cache_file(&store.path) {
            Ok(Some(entry)) => {
                log::info!(
                    "loaded {} cached rows from {} (saved {})",
                    entry.dataset.len(),
                    store.path.display(),
                    entry.created_at
                );
                store.memory.put(Some(Arc::new(entry)));
            }
            Ok(None) => {}
            Err(CacheError::Load(err)) => {
                log::warn!("ignoring unreadable cache file {}: {}", store.path.display(), err);
            }
            Err(err) => return Err(err),
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_file(path: &Path, dataset: &Dataset) -> Result<DateTime<Utc>, CacheError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(to_csv(dataset).as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;

    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

fn load_cache_file(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let dataset = from_csv_str(&text)?;
    if dataset.is_empty() {
        return Ok(None);
    }
    let modified = fs::metadata(path)?.modified()?;
    Ok(Some(CacheEntry::new(dataset, DateTime::<Utc>::from(modified))))
}

#[async_trait]
impl EntryStore for FileStore {
    fn current(&self) -> Option<Arc<CacheEntry>> {
        self.memory.current()
    }

    async fn install(
        &self,
        dataset: Dataset,
        now: DateTime<Utc>,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let _write = self.write_lock.lock().await;
        let path = self.path.clone();
        let snapshot = dataset.clone();
        let written = tokio::task::spawn_blocking(move || write_file(&path, &snapshot))
            .await
            .unwrap_or_else(|e| Err(CacheError::Io(io::Error::other(e))));
        let created_at = match written {
            Ok(modified) => modified,
            Err(err) => {
                log::warn!("could not write cache file {}: {}", self.path.display(), err);
                now
            }
        };
        let entry = Arc::new(CacheEntry::new(dataset, created_at));
        self.memory.put(Some(entry.clone()));
        Ok(entry)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _write = self.write_lock.lock().await;
        self.memory.put(None);
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
