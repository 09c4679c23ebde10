//! Entity store access
//!
//! The persistent store of tracked items is owned elsewhere; quota code only
//! lists the items visible to the current actor. Which actor is current is
//! the store's business (it follows the signed-in session).

use crate::error::{QuotaError, Result};
use crate::model::TrackedItem;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Source of the tracked items accessible to an actor
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// All items the current actor can access
    async fn list_items(&self) -> Result<Vec<TrackedItem>>;
}

/// Entity store holding items in memory
#[derive(Default)]
pub struct MemoryEntityStore {
    items: RwLock<Vec<TrackedItem>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<TrackedItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    /// Insert or replace an item
    pub async fn upsert(&self, item: TrackedItem) {
        let mut items = self.items.write().await;
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    /// Delete an item, returning whether it existed
    pub async fn delete(&self, id: &str) -> bool {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|item| item.id != id);
        items.len() != before
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryEntityStore {
    async fn list_items(&self) -> Result<Vec<TrackedItem>> {
        Ok(self.items.read().await.clone())
    }
}

/// Entity store reading a JSON array of items from disk on every call
pub struct JsonFileEntityStore {
    path: PathBuf,
}

impl JsonFileEntityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl EntityStore for JsonFileEntityStore {
    async fn list_items(&self) -> Result<Vec<TrackedItem>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(QuotaError::Io(e)),
        };
        Ok(serde_json::from_str(&content)?)
    }
}
