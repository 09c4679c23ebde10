//! Device-scoped monotonic counter
//!
//! Counts guest recordings on this device. The count never goes down when
//! items are deleted, so deleting recordings cannot buy back quota.
//!
//! Key names are part of the on-disk format. Renaming one silently resets
//! the counter to zero for existing installs.

use crate::error::Result;
use crate::storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Key holding the guest recording total
pub const GUEST_COUNTER_KEY: &str = "guest_recording_count";
/// Key holding the one-time migration flag for [`GUEST_COUNTER_KEY`]
pub const GUEST_COUNTER_MIGRATED_KEY: &str = "guest_recording_count_migrated";

/// Persistent, never-decremented counter
pub struct CounterStore {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-add-write so concurrent increments cannot lose updates
    queue: Mutex<()>,
}

impl CounterStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            queue: Mutex::new(()),
        }
    }

    /// Persisted value; 0 when absent or unreadable
    pub async fn get(&self) -> u32 {
        match self.read_value().await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read guest counter: {}", e);
                0
            }
        }
    }

    async fn read_value(&self) -> Result<u32> {
        let Some(raw) = self.store.get(GUEST_COUNTER_KEY).await? else {
            return Ok(0);
        };
        match raw.trim().parse::<u32>() {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Corrupt guest counter value '{}': {}", raw, e);
                Ok(0)
            }
        }
    }

    /// Add one and persist, returning the new total.
    ///
    /// Storage failures, reads included, are returned to the caller.
    pub async fn increment(&self) -> Result<u32> {
        let _turn = self.queue.lock().await;

        let next = self.read_value().await?.saturating_add(1);
        self.store
            .set(GUEST_COUNTER_KEY, &next.to_string())
            .await?;

        info!("Guest recording counter incremented to {}", next);
        Ok(next)
    }

    /// Usage to enforce against: never less than what was persisted
    pub async fn effective_used(&self, current_count: u32) -> u32 {
        self.get().await.max(current_count)
    }

    /// Whether the one-time seed from existing items already ran
    pub async fn is_migrated(&self) -> bool {
        match self.store.get(GUEST_COUNTER_MIGRATED_KEY).await {
            Ok(Some(flag)) => flag == "true",
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read guest counter migration flag: {}", e);
                false
            }
        }
    }

    /// Seed the counter from items recorded before it existed.
    ///
    /// Runs at most once per install. Storage errors are logged and
    /// swallowed; a failed run is retried on the next call.
    pub async fn migrate_from_existing(&self, current_count: u32) {
        if self.is_migrated().await {
            return;
        }

        let _turn = self.queue.lock().await;
        // Another caller may have finished while we waited
        if self.is_migrated().await {
            return;
        }

        if current_count > 0 {
            let persisted = self.get().await;
            let seeded = persisted.max(current_count);
            if let Err(e) = self
                .store
                .set(GUEST_COUNTER_KEY, &seeded.to_string())
                .await
            {
                warn!("Failed to seed guest counter: {}", e);
                return;
            }
            info!("Seeded guest counter from {} existing items", seeded);
        } else {
            debug!("No existing items to seed guest counter from");
        }

        if let Err(e) = self.store.set(GUEST_COUNTER_MIGRATED_KEY, "true").await {
            warn!("Failed to persist guest counter migration flag: {}", e);
        }
    }

    /// Clear the counter and its migration flag (account merge)
    pub async fn reset(&self) -> Result<()> {
        let _turn = self.queue.lock().await;
        self.store
            .remove_many(&[GUEST_COUNTER_KEY, GUEST_COUNTER_MIGRATED_KEY])
            .await?;
        info!("Guest counter reset");
        Ok(())
    }
}
