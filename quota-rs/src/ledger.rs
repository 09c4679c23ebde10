//! Usage ledger for analyses and explorations
//!
//! Records which items have already been counted so that counting is
//! idempotent per item and deleting an item never lowers a count.
//!
//! The whole ledger is one JSON object under [`LEDGER_KEY`]:
//!
//! ```json
//! {
//!   "analysisCount": 2,
//!   "explorationCount": 1,
//!   "analyzedIds": ["d1", "d2"],
//!   "exploredIds": ["d1"],
//!   "migrated": true
//! }
//! ```
//!
//! On first read an unmigrated ledger is seeded by scanning the entity store
//! once. Key names are part of the on-disk format; renaming one resets usage
//! for existing installs.

use crate::entity::EntityStore;
use crate::error::Result;
use crate::model::TrackedItem;
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Key holding the serialized [`LedgerRecord`]
pub const LEDGER_KEY: &str = "usage_ledger_v1";
/// Key holding the ledger's one-time migration flag
pub const LEDGER_MIGRATED_KEY: &str = "usage_ledger_migrated_v1";

/// Persisted ledger contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerRecord {
    pub analysis_count: u32,
    pub exploration_count: u32,
    pub analyzed_ids: BTreeSet<String>,
    pub explored_ids: BTreeSet<String>,
    pub migrated: bool,
}

impl LedgerRecord {
    /// Count an analysis of `id`; returns whether it was new
    fn add_analyzed(&mut self, id: &str) -> bool {
        let inserted = self.analyzed_ids.insert(id.to_string());
        if inserted {
            self.analysis_count = self.analysis_count.saturating_add(1);
        }
        inserted
    }

    /// Count an exploration of `id`; returns whether it was new
    fn add_explored(&mut self, id: &str) -> bool {
        let inserted = self.explored_ids.insert(id.to_string());
        if inserted {
            self.exploration_count = self.exploration_count.saturating_add(1);
        }
        inserted
    }

    fn seed_from(&mut self, items: &[TrackedItem]) {
        for item in items {
            if item.counts_as_analyzed() {
                self.add_analyzed(&item.id);
            }
            if item.counts_as_explored() {
                self.add_explored(&item.id);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Action {
    Analysis,
    Exploration,
}

/// Marks that have not reached storage yet
#[derive(Debug, Clone, Default)]
struct UnpersistedMarks {
    analyzed: BTreeSet<String>,
    explored: BTreeSet<String>,
}

impl UnpersistedMarks {
    fn is_empty(&self) -> bool {
        self.analyzed.is_empty() && self.explored.is_empty()
    }

    fn insert(&mut self, action: Action, id: &str) {
        match action {
            Action::Analysis => self.analyzed.insert(id.to_string()),
            Action::Exploration => self.explored.insert(id.to_string()),
        };
    }

    fn apply_to(&self, record: &mut LedgerRecord) {
        for id in &self.analyzed {
            record.add_analyzed(id);
        }
        for id in &self.explored {
            record.add_explored(id);
        }
    }

    /// Drop the marks contained in a successful write
    fn forget(&mut self, written: &UnpersistedMarks) {
        self.analyzed.retain(|id| !written.analyzed.contains(id));
        self.explored.retain(|id| !written.explored.contains(id));
    }
}

/// In-process ledger state. `cached` always contains every unpersisted mark.
#[derive(Default)]
struct LedgerState {
    cached: Option<LedgerRecord>,
    unpersisted: UnpersistedMarks,
}

/// Durable, per-item deduplicated usage counters with an in-process cache
pub struct UsageLedger {
    store: Arc<dyn KeyValueStore>,
    entities: Arc<dyn EntityStore>,
    state: RwLock<LedgerState>,
    /// Serializes loads and persists so storage only moves forward
    write_queue: Mutex<()>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, entities: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            entities,
            state: RwLock::new(LedgerState::default()),
            write_queue: Mutex::new(()),
        }
    }

    /// Number of distinct items ever analyzed
    pub async fn get_analysis_count(&self) -> u32 {
        self.record().await.analysis_count
    }

    /// Number of distinct items ever explored
    pub async fn get_exploration_count(&self) -> u32 {
        self.record().await.exploration_count
    }

    /// Record that `item` was analyzed, returning the resulting count
    pub async fn mark_analyzed(&self, item: &TrackedItem) -> u32 {
        self.mark(Action::Analysis, &item.id).await
    }

    /// Record that `item` was explored, returning the resulting count
    pub async fn mark_explored(&self, item: &TrackedItem) -> u32 {
        self.mark(Action::Exploration, &item.id).await
    }

    pub async fn is_analyzed(&self, id: Option<&str>) -> bool {
        match id {
            Some(id) => self.record().await.analyzed_ids.contains(id),
            None => false,
        }
    }

    pub async fn is_explored(&self, id: Option<&str>) -> bool {
        match id {
            Some(id) => self.record().await.explored_ids.contains(id),
            None => false,
        }
    }

    /// Drop the in-process copy; the next read rehydrates from storage.
    ///
    /// Marks that never reached storage are kept and reapplied on rehydrate.
    pub async fn invalidate_cache(&self) {
        let mut state = self.state.write().await;
        state.cached = None;
        if state.unpersisted.is_empty() {
            debug!("Usage ledger cache invalidated");
        } else {
            debug!(
                "Usage ledger cache invalidated, keeping {} unpersisted analyses and {} explorations",
                state.unpersisted.analyzed.len(),
                state.unpersisted.explored.len()
            );
        }
    }

    /// Delete the persisted ledger and its migration flag
    pub async fn reset(&self) -> Result<()> {
        let _turn = self.write_queue.lock().await;
        self.store
            .remove_many(&[LEDGER_KEY, LEDGER_MIGRATED_KEY])
            .await?;
        *self.state.write().await = LedgerState::default();
        info!("Usage ledger reset");
        Ok(())
    }

    async fn mark(&self, action: Action, id: &str) -> u32 {
        let (inserted, count) = loop {
            {
                let mut state = self.state.write().await;
                let LedgerState {
                    cached,
                    unpersisted,
                } = &mut *state;
                if let Some(record) = cached.as_mut() {
                    let marked = match action {
                        Action::Analysis => (record.add_analyzed(id), record.analysis_count),
                        Action::Exploration => {
                            (record.add_explored(id), record.exploration_count)
                        }
                    };
                    if marked.0 {
                        unpersisted.insert(action, id);
                    }
                    break marked;
                }
            }
            // Not loaded yet, or invalidated since the last look
            self.record().await;
        };

        if inserted {
            debug!("Ledger counted item {} (count now {})", id, count);
            // Unpersisted marks stay in memory and are retried later
            if let Err(e) = self.flush().await {
                warn!("Failed to persist usage ledger: {}", e);
            }
        }

        count
    }

    /// Write the newest cached record
    async fn flush(&self) -> Result<()> {
        let _turn = self.write_queue.lock().await;

        let (record, written) = {
            let state = self.state.read().await;
            match &state.cached {
                Some(record) => (record.clone(), state.unpersisted.clone()),
                // Invalidated; the next rehydrate persists the pending marks
                None => return Ok(()),
            }
        };
        if written.is_empty() {
            return Ok(());
        }

        self.persist(&record).await?;
        self.state.write().await.unpersisted.forget(&written);
        Ok(())
    }

    /// Cached record, loading (and migrating) it on first use
    async fn record(&self) -> LedgerRecord {
        if let Some(record) = self.state.read().await.cached.as_ref() {
            return record.clone();
        }

        let _turn = self.write_queue.lock().await;
        // Another caller may have loaded while we waited
        if let Some(record) = self.state.read().await.cached.as_ref() {
            return record.clone();
        }

        let (loaded, migrated_now) = self.load().await;

        let (record, written) = {
            let mut state = self.state.write().await;
            let LedgerState {
                cached,
                unpersisted,
            } = &mut *state;
            let record = cached.get_or_insert(loaded);
            unpersisted.apply_to(record);
            (record.clone(), unpersisted.clone())
        };

        if !migrated_now && written.is_empty() {
            return record;
        }

        match self.persist(&record).await {
            Ok(()) => {
                self.state.write().await.unpersisted.forget(&written);
                if migrated_now {
                    if let Err(e) = self.store.set(LEDGER_MIGRATED_KEY, "true").await {
                        warn!("Failed to persist usage ledger migration flag: {}", e);
                    }
                }
            }
            Err(e) => warn!("Failed to persist usage ledger: {}", e),
        }

        record
    }

    /// Stored record, seeded from the entity store when not yet migrated.
    /// Returns whether this call ran the migration.
    async fn load(&self) -> (LedgerRecord, bool) {
        let mut record = self.read_persisted().await;
        if record.migrated || self.read_migrated_flag().await {
            record.migrated = true;
            return (record, false);
        }

        let items = match self.entities.list_items().await {
            Ok(items) => items,
            Err(e) => {
                warn!("Usage ledger migration scan failed, will retry: {}", e);
                return (record, false);
            }
        };

        record.seed_from(&items);
        record.migrated = true;
        info!(
            "Usage ledger migrated from {} items ({} analyses, {} explorations)",
            items.len(),
            record.analysis_count,
            record.exploration_count
        );

        (record, true)
    }

    async fn read_persisted(&self) -> LedgerRecord {
        match self.store.get(LEDGER_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Corrupt usage ledger, starting from empty: {}", e);
                LedgerRecord::default()
            }),
            Ok(None) => LedgerRecord::default(),
            Err(e) => {
                warn!("Failed to read usage ledger: {}", e);
                LedgerRecord::default()
            }
        }
    }

    async fn read_migrated_flag(&self) -> bool {
        match self.store.get(LEDGER_MIGRATED_KEY).await {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(e) => {
                warn!("Failed to read usage ledger migration flag: {}", e);
                false
            }
        }
    }

    async fn persist(&self, record: &LedgerRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.store.set(LEDGER_KEY, &raw).await
    }
}
