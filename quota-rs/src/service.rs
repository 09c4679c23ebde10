//! Quota service facade
//!
//! The one entry point the application talks to. It picks the provider once
//! at construction, resolves the actor's tier and routes invalidation. It
//! holds no counts of its own.
//!
//! # Invalidation contract
//!
//! Every mutation of the underlying data (an analysis finished, a message
//! sent, an item deleted) must be followed by [`QuotaService::invalidate`]
//! before the next check, otherwise the check sees cached data. The
//! `record_*` methods here invalidate on their own; mutations made elsewhere
//! are the caller's responsibility.

use crate::counter::CounterStore;
use crate::entity::EntityStore;
use crate::error::{QuotaError, Result};
use crate::identity::IdentityService;
use crate::ledger::UsageLedger;
use crate::model::{
    saturating_count, Actor, ItemTarget, QuotaSnapshot, TrackedItem, UsageBreakdown, UsageEntry,
};
use crate::policy::{PolicyTable, QuotaAction};
use crate::provider::{BackendClient, LocalProvider, ProviderMode, RemoteProvider, UsageProvider};
use crate::storage::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators the service is built from
#[derive(Clone)]
pub struct QuotaDeps {
    /// Durable key-value store for counters
    pub store: Arc<dyn KeyValueStore>,
    /// Items accessible to the current actor
    pub entities: Arc<dyn EntityStore>,
    /// Auth lookups
    pub identity: Arc<dyn IdentityService>,
    /// Backend client, required in remote mode
    pub backend: Option<Arc<dyn BackendClient>>,
    pub policy: PolicyTable,
}

/// Public quota API
pub struct QuotaService {
    mode: ProviderMode,
    provider: Arc<dyn UsageProvider>,
    policy: PolicyTable,
    counter: CounterStore,
    ledger: Arc<UsageLedger>,
    entities: Arc<dyn EntityStore>,
    identity: Arc<dyn IdentityService>,
}

impl QuotaService {
    /// Build the service; the provider chosen here is fixed for its lifetime
    pub fn new(mode: ProviderMode, deps: QuotaDeps) -> Result<Self> {
        deps.policy.validate()?;

        let ledger = Arc::new(UsageLedger::new(
            deps.store.clone(),
            deps.entities.clone(),
        ));

        let provider: Arc<dyn UsageProvider> = match mode {
            ProviderMode::Simulation => Arc::new(LocalProvider::new(
                deps.entities.clone(),
                ledger.clone(),
                deps.policy.clone(),
            )),
            ProviderMode::Remote => {
                let client = deps.backend.clone().ok_or_else(|| {
                    QuotaError::Config("remote mode requires a backend client".to_string())
                })?;
                Arc::new(RemoteProvider::new(client, deps.policy.clone()))
            }
        };

        info!("Quota service using {} provider", provider.name());

        Ok(Self {
            mode,
            provider,
            policy: deps.policy,
            counter: CounterStore::new(deps.store),
            ledger,
            entities: deps.entities,
            identity: deps.identity,
        })
    }

    pub fn mode(&self) -> ProviderMode {
        self.mode
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Usage snapshot with no particular item in view
    pub async fn get_quota_status(&self, actor: &Actor) -> QuotaSnapshot {
        self.get_quota_status_for(actor, None).await
    }

    /// Usage snapshot, with message usage measured on `target`
    pub async fn get_quota_status_for(
        &self,
        actor: &Actor,
        target: Option<&ItemTarget>,
    ) -> QuotaSnapshot {
        let tier = actor.tier();
        let limits = self.policy.limits(tier);

        let (analyses, explorations, messages) = tokio::join!(
            self.provider.get_used_analysis_count(actor),
            self.provider.get_used_exploration_count(actor),
            self.provider.get_used_messages_count(target, actor),
        );

        let is_upgraded = if actor.is_guest() {
            Some(self.device_has_account().await)
        } else {
            None
        };

        QuotaSnapshot {
            tier,
            usage: UsageBreakdown {
                analyses: UsageEntry::new(analyses, limits.analyses),
                explorations: UsageEntry::new(explorations, limits.explorations),
                messages: UsageEntry::new(messages, limits.messages),
            },
            is_upgraded,
        }
    }

    pub async fn can_analyze_now(&self, actor: &Actor) -> bool {
        self.provider.can_analyze_item(actor).await
    }

    pub async fn can_explore_now(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool {
        self.provider.can_explore_item(target, actor).await
    }

    pub async fn can_chat_now(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool {
        self.provider.can_send_message(target, actor).await
    }

    /// Record a finished analysis and invalidate
    pub async fn record_analysis(&self, item: &TrackedItem, actor: &Actor) -> u32 {
        let count = self.provider.record_analysis(item, actor).await;
        self.invalidate(actor).await;
        count
    }

    /// Record a started exploration and invalidate
    pub async fn record_exploration(&self, item: &TrackedItem, actor: &Actor) -> u32 {
        let count = self.provider.record_exploration(item, actor).await;
        self.invalidate(actor).await;
        count
    }

    /// Items this device has recorded as a guest, including deleted ones.
    ///
    /// The first call seeds the counter from the items that already exist.
    pub async fn guest_recordings_used(&self) -> u32 {
        let current = self.live_item_count().await;
        self.counter.migrate_from_existing(current).await;
        self.counter.effective_used(current).await
    }

    pub async fn can_record_now(&self, actor: &Actor) -> bool {
        let tier = actor.tier();
        match self.policy.limit(tier, QuotaAction::Recording) {
            Some(limit) => self.guest_recordings_used().await < limit,
            None => true,
        }
    }

    /// Count a new guest recording.
    ///
    /// Check [`QuotaService::can_record_now`] before saving the item so that
    /// pre-existing items are seeded first. Signed-in actors are not counted.
    /// A failed write is returned: the count must not silently fall behind.
    pub async fn record_guest_item(&self, actor: &Actor) -> Result<u32> {
        if !actor.is_guest() {
            debug!("Skipping guest counter for signed-in actor");
            return Ok(0);
        }
        let total = self.counter.increment().await?;
        self.invalidate(actor).await;
        Ok(total)
    }

    /// Drop cached items and counts; the next check recomputes
    pub async fn invalidate(&self, actor: &Actor) {
        self.provider.invalidate().await;
        debug!("Invalidated quota caches for {} actor", actor.tier());
    }

    /// Forget all device-local usage (account merge)
    pub async fn reset_local_usage(&self) -> Result<()> {
        self.counter.reset().await?;
        self.ledger.reset().await?;
        self.provider.invalidate().await;
        info!("Local usage reset");
        Ok(())
    }

    async fn device_has_account(&self) -> bool {
        self.identity.device_has_account().await.unwrap_or_else(|e| {
            warn!("Device account lookup failed: {}", e);
            false
        })
    }

    async fn live_item_count(&self) -> u32 {
        match self.entities.list_items().await {
            Ok(items) => saturating_count(items.len()),
            Err(e) => {
                warn!("Failed to list items for guest counter: {}", e);
                0
            }
        }
    }
}
