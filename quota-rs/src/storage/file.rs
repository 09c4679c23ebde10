//! JSON file key-value store
//!
//! All entries live in one JSON object on disk. Writes go to a temporary
//! file that is renamed over the original, so a crash never leaves a
//! half-written file behind. The in-memory map is only locked for the
//! update itself; file writes go through a single flush queue and always
//! write the newest map.

use super::KeyValueStore;
use crate::error::{QuotaError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Key-value store persisted to a single JSON file
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    flush_queue: Mutex<()>,
}

impl FileStore {
    /// Open the store, loading existing entries.
    ///
    /// A missing file starts empty. An unreadable or corrupt file also starts
    /// empty (logged); it is replaced on the next write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring corrupt state file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file {} not found, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(QuotaError::Io(e)),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            flush_queue: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<()> {
        let _turn = self.flush_queue.lock().await;
        let content = serde_json::to_string_pretty(&*self.entries.read().await)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let previous = self
            .entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());

        if let Err(e) = self.flush().await {
            // Undo, unless a later write already replaced the value
            let mut entries = self.entries.write().await;
            if entries.get(key).map(String::as_str) == Some(value) {
                match previous {
                    Some(previous) => entries.insert(key.to_string(), previous),
                    None => entries.remove(key),
                };
            }
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.remove_many(&[key]).await
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let removed: Vec<(String, String)> = {
            let mut entries = self.entries.write().await;
            keys.iter()
                .filter_map(|key| entries.remove_entry(*key))
                .collect()
        };
        if removed.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.flush().await {
            let mut entries = self.entries.write().await;
            for (key, value) in removed {
                entries.entry(key).or_insert(value);
            }
            return Err(e);
        }
        Ok(())
    }
}
