//! Durable key-value storage
//!
//! Provides string key-value backends used to persist counters:
//! - [`memory`]: In-process store, lost on exit (tests and simulation)
//! - [`file`]: JSON file store with atomic replace on every write

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;

/// Durable store of string values
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value (`None` if absent)
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value (absent keys are ignored)
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove several values at once
    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}
