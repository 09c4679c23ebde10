//! Remote-backed provider
//!
//! Forwards every question to the backend of record. Retries, caching and
//! backoff belong to the [`BackendClient`] implementation.
//!
//! Backend failures never reach the caller: counts degrade to zero and
//! checks allow the action, since wrongly blocking a paying user is worse
//! than briefly under-counting.

use super::UsageProvider;
use crate::error::Result;
use crate::model::{Actor, ItemTarget, TrackedItem};
use crate::policy::{PolicyTable, QuotaAction};
use std::sync::Arc;
use tracing::{debug, warn};

/// Client for the backend of record
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    async fn used_analysis_count(&self, actor: &Actor) -> Result<u32>;

    async fn used_exploration_count(&self, actor: &Actor) -> Result<u32>;

    /// Actor-authored messages on one item
    async fn used_messages_count(&self, item_id: &str, actor: &Actor) -> Result<u32>;

    async fn can_analyze(&self, actor: &Actor) -> Result<bool>;

    /// Whether the item may be explored (already explored items pass)
    async fn can_explore(&self, item_id: &str, actor: &Actor) -> Result<bool>;

    async fn can_send_message(&self, item_id: &str, actor: &Actor) -> Result<bool>;

    async fn record_analysis(&self, item_id: &str, actor: &Actor) -> Result<u32>;

    async fn record_exploration(&self, item_id: &str, actor: &Actor) -> Result<u32>;

    /// Drop whatever the client caches
    async fn invalidate(&self);
}

/// Provider backed by the remote source of truth
pub struct RemoteProvider {
    client: Arc<dyn BackendClient>,
    policy: PolicyTable,
}

impl RemoteProvider {
    /// The policy table only answers checks that have no item to ask about
    pub fn new(client: Arc<dyn BackendClient>, policy: PolicyTable) -> Self {
        Self { client, policy }
    }

    fn count_or_zero(what: &str, result: Result<u32>) -> u32 {
        result.unwrap_or_else(|e| {
            warn!("Backend {} failed: {}", what, e);
            0
        })
    }

    fn decision_or_allow(what: &str, result: Result<bool>) -> bool {
        result.unwrap_or_else(|e| {
            warn!("Backend {} check failed, allowing: {}", what, e);
            true
        })
    }
}

#[async_trait::async_trait]
impl UsageProvider for RemoteProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn get_used_analysis_count(&self, actor: &Actor) -> u32 {
        Self::count_or_zero(
            "analysis count",
            self.client.used_analysis_count(actor).await,
        )
    }

    async fn get_used_exploration_count(&self, actor: &Actor) -> u32 {
        Self::count_or_zero(
            "exploration count",
            self.client.used_exploration_count(actor).await,
        )
    }

    async fn get_used_messages_count(&self, target: Option<&ItemTarget>, actor: &Actor) -> u32 {
        let Some(target) = target else {
            return 0;
        };
        Self::count_or_zero(
            "message count",
            self.client.used_messages_count(target.id(), actor).await,
        )
    }

    async fn can_analyze_item(&self, actor: &Actor) -> bool {
        if self.policy.limit(actor.tier(), QuotaAction::Analysis).is_none() {
            return true;
        }
        Self::decision_or_allow("analysis", self.client.can_analyze(actor).await)
    }

    async fn can_explore_item(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool {
        let tier = actor.tier();
        if self.policy.limit(tier, QuotaAction::Exploration).is_none() {
            return true;
        }
        match target {
            Some(target) => Self::decision_or_allow(
                "exploration",
                self.client.can_explore(target.id(), actor).await,
            ),
            None => {
                let used = self.get_used_exploration_count(actor).await;
                self.policy.allows(tier, QuotaAction::Exploration, used)
            }
        }
    }

    async fn can_send_message(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool {
        let tier = actor.tier();
        if self.policy.limit(tier, QuotaAction::Message).is_none() {
            return true;
        }
        match target {
            Some(target) => Self::decision_or_allow(
                "message",
                self.client.can_send_message(target.id(), actor).await,
            ),
            None => self.policy.allows(tier, QuotaAction::Message, 0),
        }
    }

    async fn record_analysis(&self, item: &TrackedItem, actor: &Actor) -> u32 {
        Self::count_or_zero(
            "record analysis",
            self.client.record_analysis(&item.id, actor).await,
        )
    }

    async fn record_exploration(&self, item: &TrackedItem, actor: &Actor) -> u32 {
        Self::count_or_zero(
            "record exploration",
            self.client.record_exploration(&item.id, actor).await,
        )
    }

    async fn invalidate(&self) {
        self.client.invalidate().await;
        debug!("Remote provider invalidated");
    }
}
