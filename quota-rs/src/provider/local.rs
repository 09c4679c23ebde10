//! Local simulation provider
//!
//! Analysis and exploration usage come from the usage ledger, so deleting
//! items cannot lower them. Message usage is recomputed from the item's own
//! chat history on every call; it is bounded by that history and needs no
//! ledger.

use super::UsageProvider;
use crate::entity::EntityStore;
use crate::ledger::UsageLedger;
use crate::model::{saturating_count, Actor, ItemTarget, TrackedItem};
use crate::policy::{PolicyTable, QuotaAction};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Provider computing usage on this device
pub struct LocalProvider {
    entities: Arc<dyn EntityStore>,
    ledger: Arc<UsageLedger>,
    policy: PolicyTable,
    items: RwLock<Option<Arc<Vec<TrackedItem>>>>,
}

impl LocalProvider {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        ledger: Arc<UsageLedger>,
        policy: PolicyTable,
    ) -> Self {
        Self {
            entities,
            ledger,
            policy,
            items: RwLock::new(None),
        }
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Cached item collection, fetched on first use
    async fn items(&self) -> Arc<Vec<TrackedItem>> {
        if let Some(items) = self.items.read().await.as_ref() {
            return items.clone();
        }

        match self.entities.list_items().await {
            Ok(items) => {
                let items = Arc::new(items);
                debug!("Cached {} items", items.len());
                *self.items.write().await = Some(items.clone());
                items
            }
            Err(e) => {
                warn!("Failed to list items: {}", e);
                Arc::new(Vec::new())
            }
        }
    }

    /// Fetch again, replacing the cache when the collection changed size
    async fn refetch(&self) -> Arc<Vec<TrackedItem>> {
        let fresh = match self.entities.list_items().await {
            Ok(items) => Arc::new(items),
            Err(e) => {
                warn!("Failed to refetch items: {}", e);
                return self.items().await;
            }
        };

        let mut cache = self.items.write().await;
        let cached_len = cache.as_ref().map(|items| items.len());
        if cached_len != Some(fresh.len()) {
            debug!(
                "Item collection changed size ({:?} -> {}), replacing cache",
                cached_len,
                fresh.len()
            );
            *cache = Some(fresh.clone());
        }
        fresh
    }

    async fn resolve(&self, target: Option<&ItemTarget>) -> Option<TrackedItem> {
        match target? {
            ItemTarget::Item(item) => Some(item.clone()),
            ItemTarget::Id(id) => {
                if let Some(item) = self.items().await.iter().find(|item| &item.id == id) {
                    return Some(item.clone());
                }
                // Possibly created after the cache was filled
                let found = self
                    .refetch()
                    .await
                    .iter()
                    .find(|item| &item.id == id)
                    .cloned();
                if found.is_none() {
                    debug!("Item {} not found", id);
                }
                found
            }
        }
    }

    async fn live_analyzed_count(&self) -> u32 {
        saturating_count(
            self.items()
                .await
                .iter()
                .filter(|item| item.counts_as_analyzed())
                .count(),
        )
    }

    async fn live_explored_count(&self) -> u32 {
        saturating_count(
            self.items()
                .await
                .iter()
                .filter(|item| item.counts_as_explored())
                .count(),
        )
    }
}

#[async_trait::async_trait]
impl UsageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local-simulation"
    }

    async fn get_used_analysis_count(&self, _actor: &Actor) -> u32 {
        let recorded = self.ledger.get_analysis_count().await;
        recorded.max(self.live_analyzed_count().await)
    }

    async fn get_used_exploration_count(&self, _actor: &Actor) -> u32 {
        let recorded = self.ledger.get_exploration_count().await;
        recorded.max(self.live_explored_count().await)
    }

    async fn get_used_messages_count(&self, target: Option<&ItemTarget>, _actor: &Actor) -> u32 {
        self.resolve(target)
            .await
            .map(|item| item.actor_message_count())
            .unwrap_or(0)
    }

    async fn can_analyze_item(&self, actor: &Actor) -> bool {
        let tier = actor.tier();
        if self.policy.limit(tier, QuotaAction::Analysis).is_none() {
            return true;
        }
        let used = self.get_used_analysis_count(actor).await;
        self.policy.allows(tier, QuotaAction::Analysis, used)
    }

    async fn can_explore_item(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool {
        let tier = actor.tier();
        if self.policy.limit(tier, QuotaAction::Exploration).is_none() {
            return true;
        }

        if let Some(target) = target {
            if self.ledger.is_explored(Some(target.id())).await {
                return true;
            }
            if let Some(item) = self.resolve(Some(target)).await {
                if item.counts_as_explored() {
                    return true;
                }
            }
        }

        let used = self.get_used_exploration_count(actor).await;
        self.policy.allows(tier, QuotaAction::Exploration, used)
    }

    async fn can_send_message(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool {
        let tier = actor.tier();
        if self.policy.limit(tier, QuotaAction::Message).is_none() {
            return true;
        }
        let used = self.get_used_messages_count(target, actor).await;
        self.policy.allows(tier, QuotaAction::Message, used)
    }

    async fn record_analysis(&self, item: &TrackedItem, _actor: &Actor) -> u32 {
        self.ledger.mark_analyzed(item).await
    }

    async fn record_exploration(&self, item: &TrackedItem, _actor: &Actor) -> u32 {
        self.ledger.mark_explored(item).await
    }

    async fn invalidate(&self) {
        *self.items.write().await = None;
        self.ledger.invalidate_cache().await;
        debug!("Local provider caches invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::MemoryEntityStore;
    use crate::model::{ChatTurn, Tier, TurnRole};
    use crate::storage::MemoryStore;
    use chrono::Utc;

    fn provider(items: Vec<TrackedItem>) -> (Arc<MemoryEntityStore>, LocalProvider) {
        let entities = Arc::new(MemoryEntityStore::with_items(items));
        let ledger = Arc::new(UsageLedger::new(
            Arc::new(MemoryStore::new()),
            entities.clone(),
        ));
        let provider = LocalProvider::new(entities.clone(), ledger, PolicyTable::default());
        (entities, provider)
    }

    fn with_messages(id: &str, actor_turns: usize) -> TrackedItem {
        let mut item = TrackedItem::new(id);
        for i in 0..actor_turns {
            item.chat_history
                .push(ChatTurn::new(TurnRole::Actor, format!("question {}", i)));
            item.chat_history
                .push(ChatTurn::new(TurnRole::Assistant, format!("answer {}", i)));
        }
        item
    }

    fn analyzed(id: &str) -> TrackedItem {
        let mut item = TrackedItem::new(id);
        item.is_analyzed = true;
        item.analyzed_at = Some(Utc::now());
        item
    }

    #[tokio::test]
    async fn test_message_count_by_id_and_item() {
        let (_, provider) = provider(vec![with_messages("d1", 3)]);
        let actor = Actor::Guest;

        let by_id = ItemTarget::Id("d1".to_string());
        assert_eq!(provider.get_used_messages_count(Some(&by_id), &actor).await, 3);

        let by_item = ItemTarget::Item(with_messages("other", 5));
        assert_eq!(provider.get_used_messages_count(Some(&by_item), &actor).await, 5);

        let missing = ItemTarget::Id("nope".to_string());
        assert_eq!(provider.get_used_messages_count(Some(&missing), &actor).await, 0);
        assert_eq!(provider.get_used_messages_count(None, &actor).await, 0);
    }

    #[tokio::test]
    async fn test_new_item_found_after_cache_filled() {
        let (entities, provider) = provider(vec![with_messages("d1", 1)]);
        let actor = Actor::Guest;
        assert_eq!(
            provider
                .get_used_messages_count(Some(&ItemTarget::Id("d1".into())), &actor)
                .await,
            1
        );

        entities.upsert(with_messages("d2", 4)).await;
        assert_eq!(
            provider
                .get_used_messages_count(Some(&ItemTarget::Id("d2".into())), &actor)
                .await,
            4
        );
    }

    #[tokio::test]
    async fn test_invalidate_reflects_shrunk_collection() {
        let (entities, provider) = provider(vec![with_messages("d1", 2)]);
        let actor = Actor::Guest;
        let target = ItemTarget::Id("d1".to_string());

        assert_eq!(provider.get_used_messages_count(Some(&target), &actor).await, 2);

        entities.delete("d1").await;
        // Still served from the cache
        assert_eq!(provider.get_used_messages_count(Some(&target), &actor).await, 2);

        provider.invalidate().await;
        assert_eq!(provider.get_used_messages_count(Some(&target), &actor).await, 0);
    }

    #[tokio::test]
    async fn test_analysis_usage_never_understates_live_items() {
        let (_, provider) = provider(Vec::new());
        let actor = Actor::Guest;
        provider.record_analysis(&TrackedItem::new("x"), &actor).await;
        assert_eq!(provider.get_used_analysis_count(&actor).await, 1);

        let (_, provider) = self::provider(vec![analyzed("a"), analyzed("b")]);
        assert_eq!(provider.get_used_analysis_count(&actor).await, 2);
    }

    #[tokio::test]
    async fn test_explored_item_always_passes() {
        let (_, provider) = provider(Vec::new());
        let guest = Actor::Guest;
        let first = TrackedItem::new("d1");

        assert!(provider.can_explore_item(Some(&ItemTarget::Item(first.clone())), &guest).await);
        provider.record_exploration(&first, &guest).await;

        // Guest exploration limit is 1
        let second = ItemTarget::Id("d2".to_string());
        assert!(!provider.can_explore_item(Some(&second), &guest).await);
        assert!(provider.can_explore_item(Some(&ItemTarget::Item(first)), &guest).await);
    }

    #[tokio::test]
    async fn test_premium_unlimited() {
        let (_, provider) = provider(vec![with_messages("d1", 50)]);
        let premium = Actor::user("u1", Tier::Premium);
        for i in 0..10 {
            provider
                .record_analysis(&TrackedItem::new(format!("d{}", i)), &premium)
                .await;
        }
        assert!(provider.can_analyze_item(&premium).await);
        assert!(
            provider
                .can_send_message(Some(&ItemTarget::Id("d1".into())), &premium)
                .await
        );
        assert!(!provider.can_analyze_item(&Actor::Guest).await);
    }
}
