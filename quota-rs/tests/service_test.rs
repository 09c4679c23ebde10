//! Integration tests for the quota service in simulation mode

use chrono::Utc;
use quota_rs::entity::{EntityStore, MemoryEntityStore};
use quota_rs::identity::StaticIdentity;
use quota_rs::model::{Actor, ChatTurn, ItemTarget, Tier, TrackedItem, TurnRole};
use quota_rs::storage::{KeyValueStore, MemoryStore};
use quota_rs::{PolicyTable, ProviderMode, QuotaDeps, QuotaError, QuotaService};
use quota_rs::ledger::LEDGER_KEY;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Entity store that counts full scans
struct CountingEntities {
    inner: MemoryEntityStore,
    scans: AtomicUsize,
}

#[async_trait::async_trait]
impl EntityStore for CountingEntities {
    async fn list_items(&self) -> quota_rs::Result<Vec<TrackedItem>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.list_items().await
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    entities: Arc<CountingEntities>,
    service: QuotaService,
}

fn setup_with(items: Vec<TrackedItem>, device_registered: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let entities = Arc::new(CountingEntities {
        inner: MemoryEntityStore::with_items(items),
        scans: AtomicUsize::new(0),
    });
    let deps = QuotaDeps {
        store: store.clone(),
        entities: entities.clone(),
        identity: Arc::new(StaticIdentity::new(device_registered)),
        backend: None,
        policy: PolicyTable::default(),
    };
    let service = QuotaService::new(ProviderMode::Simulation, deps).unwrap();
    Harness {
        store,
        entities,
        service,
    }
}

fn setup(items: Vec<TrackedItem>) -> Harness {
    setup_with(items, false)
}

fn analyzed(id: &str) -> TrackedItem {
    let mut item = TrackedItem::new(id);
    item.is_analyzed = true;
    item.analyzed_at = Some(Utc::now());
    item
}

fn with_actor_messages(id: &str, count: usize) -> TrackedItem {
    let mut item = TrackedItem::new(id);
    item.exploration_started_at = Some(Utc::now());
    for i in 0..count {
        item.chat_history
            .push(ChatTurn::new(TurnRole::Actor, format!("message {}", i)));
        item.chat_history
            .push(ChatTurn::new(TurnRole::Assistant, format!("reply {}", i)));
    }
    item
}

#[tokio::test]
async fn test_simulation_uses_local_provider() {
    let h = setup(Vec::new());
    assert_eq!(h.service.mode(), ProviderMode::Simulation);
    assert_eq!(h.service.provider_name(), "local-simulation");
}

#[tokio::test]
async fn test_remote_mode_requires_backend() {
    let deps = QuotaDeps {
        store: Arc::new(MemoryStore::new()),
        entities: Arc::new(MemoryEntityStore::new()),
        identity: Arc::new(StaticIdentity::default()),
        backend: None,
        policy: PolicyTable::default(),
    };
    let result = QuotaService::new(ProviderMode::Remote, deps);
    assert!(matches!(result, Err(QuotaError::Config(_))));
}

#[tokio::test]
async fn test_invalid_policy_rejected() {
    let mut policy = PolicyTable::default();
    policy.guest.analyses = Some(0);
    let deps = QuotaDeps {
        store: Arc::new(MemoryStore::new()),
        entities: Arc::new(MemoryEntityStore::new()),
        identity: Arc::new(StaticIdentity::default()),
        backend: None,
        policy,
    };
    assert!(QuotaService::new(ProviderMode::Simulation, deps).is_err());
}

#[tokio::test]
async fn test_guest_analysis_gate() {
    let h = setup(Vec::new());
    let guest = Actor::Guest;

    assert!(h.service.can_analyze_now(&guest).await);
    h.service.record_analysis(&TrackedItem::new("d1"), &guest).await;
    assert!(h.service.can_analyze_now(&guest).await);
    h.service.record_analysis(&TrackedItem::new("d2"), &guest).await;

    assert!(!h.service.can_analyze_now(&guest).await);

    // Same history, premium tier
    let premium = Actor::user("u1", Tier::Premium);
    assert!(h.service.can_analyze_now(&premium).await);
}

#[tokio::test]
async fn test_reanalyzing_same_item_counts_once() {
    let h = setup(Vec::new());
    let guest = Actor::Guest;
    let item = TrackedItem::new("d1");

    assert_eq!(h.service.record_analysis(&item, &guest).await, 1);
    assert_eq!(h.service.record_analysis(&item, &guest).await, 1);
    assert!(h.service.can_analyze_now(&guest).await);
}

#[tokio::test]
async fn test_guest_gate_holds_when_storage_is_read_only() {
    let h = setup(Vec::new());
    let guest = Actor::Guest;
    h.service.get_quota_status(&guest).await;
    h.store.set_fail_writes(true);

    let mut allowed = 0;
    for i in 0..5 {
        if h.service.can_analyze_now(&guest).await {
            h.service
                .record_analysis(&TrackedItem::new(format!("d{}", i)), &guest)
                .await;
            allowed += 1;
        }
    }

    assert_eq!(allowed, 2);
    let status = h.service.get_quota_status(&guest).await;
    assert_eq!(status.usage.analyses.used, 2);
}

/// Store whose next ledger write stalls, to overlap two recordings
struct StallingStore {
    inner: MemoryStore,
    stall_next_ledger_write: AtomicBool,
}

#[async_trait::async_trait]
impl KeyValueStore for StallingStore {
    async fn get(&self, key: &str) -> quota_rs::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> quota_rs::Result<()> {
        if key == LEDGER_KEY && self.stall_next_ledger_write.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> quota_rs::Result<()> {
        self.inner.remove(key).await
    }
}

#[tokio::test]
async fn test_rapid_double_record_keeps_both() {
    let store = Arc::new(StallingStore {
        inner: MemoryStore::new(),
        stall_next_ledger_write: AtomicBool::new(false),
    });
    let deps = QuotaDeps {
        store: store.clone(),
        entities: Arc::new(MemoryEntityStore::new()),
        identity: Arc::new(StaticIdentity::default()),
        backend: None,
        policy: PolicyTable::default(),
    };
    let service = Arc::new(QuotaService::new(ProviderMode::Simulation, deps).unwrap());
    let guest = Actor::Guest;
    service.get_quota_status(&guest).await;

    store.stall_next_ledger_write.store(true, Ordering::SeqCst);
    let first = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .record_analysis(&TrackedItem::new("d1"), &Actor::Guest)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .record_analysis(&TrackedItem::new("d2"), &Actor::Guest)
                .await
        })
    };
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(second.await.unwrap(), 2);

    service.invalidate(&guest).await;
    let status = service.get_quota_status(&guest).await;
    assert_eq!(status.usage.analyses.used, 2);
    assert!(!service.can_analyze_now(&guest).await);

    let raw = store.get(LEDGER_KEY).await.unwrap().unwrap();
    assert!(raw.contains("\"d1\"") && raw.contains("\"d2\""));
}

#[tokio::test]
async fn test_usage_survives_item_deletion() {
    let h = setup(vec![analyzed("d1"), analyzed("d2")]);
    let guest = Actor::Guest;

    let before = h.service.get_quota_status(&guest).await;
    assert_eq!(before.usage.analyses.used, 2);

    h.entities.inner.delete("d1").await;
    h.entities.inner.delete("d2").await;
    h.service.invalidate(&guest).await;

    let after = h.service.get_quota_status(&guest).await;
    assert_eq!(after.usage.analyses.used, 2);
    assert!(!h.service.can_analyze_now(&guest).await);
}

#[tokio::test]
async fn test_ledger_migration_scans_once_across_reads() {
    let h = setup(vec![analyzed("d1"), analyzed("d2"), analyzed("d3")]);
    let actor = Actor::user("u1", Tier::Free);

    let first = h.service.get_quota_status(&actor).await;
    let scans_after_first = h.entities.scans.load(Ordering::SeqCst);
    let second = h.service.get_quota_status(&actor).await;

    assert_eq!(first.usage.analyses.used, 3);
    assert_eq!(second.usage.analyses.used, 3);
    // Later reads are served from caches
    assert_eq!(h.entities.scans.load(Ordering::SeqCst), scans_after_first);
}

#[tokio::test]
async fn test_free_message_limit() {
    let h = setup(vec![with_actor_messages("d19", 19), with_actor_messages("d20", 20)]);
    let free = Actor::user("u1", Tier::Free);

    // About to send the 20th
    let target = ItemTarget::Id("d19".to_string());
    assert!(h.service.can_chat_now(Some(&target), &free).await);

    // About to send the 21st
    let target = ItemTarget::Id("d20".to_string());
    assert!(!h.service.can_chat_now(Some(&target), &free).await);

    let premium = Actor::user("u2", Tier::Premium);
    assert!(h.service.can_chat_now(Some(&target), &premium).await);
}

#[tokio::test]
async fn test_chat_without_target_uses_zero_usage() {
    let h = setup(Vec::new());
    assert!(h.service.can_chat_now(None, &Actor::Guest).await);
    let missing = ItemTarget::Id("ghost".to_string());
    assert!(h.service.can_chat_now(Some(&missing), &Actor::Guest).await);
}

#[tokio::test]
async fn test_exploration_is_one_time_gate() {
    let h = setup(Vec::new());
    let free = Actor::user("u1", Tier::Free);
    let first = TrackedItem::new("d1");
    let second = TrackedItem::new("d2");

    h.service.record_exploration(&first, &free).await;
    h.service.record_exploration(&second, &free).await;

    let third = ItemTarget::Id("d3".to_string());
    assert!(!h.service.can_explore_now(Some(&third), &free).await);

    // Already-explored items keep passing
    let again = ItemTarget::Item(first);
    assert!(h.service.can_explore_now(Some(&again), &free).await);
}

#[tokio::test]
async fn test_quota_snapshot() {
    let h = setup(vec![analyzed("d1"), with_actor_messages("d2", 4)]);
    let free = Actor::user("u1", Tier::Free);
    let target = ItemTarget::Id("d2".to_string());

    let snapshot = h.service.get_quota_status_for(&free, Some(&target)).await;
    assert_eq!(snapshot.tier, Tier::Free);
    assert_eq!(snapshot.usage.analyses.used, 1);
    assert_eq!(snapshot.usage.analyses.limit, Some(5));
    assert_eq!(snapshot.usage.analyses.remaining, Some(4));
    assert_eq!(snapshot.usage.explorations.used, 1);
    assert_eq!(snapshot.usage.messages.used, 4);
    assert_eq!(snapshot.usage.messages.remaining, Some(16));
    assert_eq!(snapshot.is_upgraded, None);

    let premium = h
        .service
        .get_quota_status(&Actor::user("u2", Tier::Premium))
        .await;
    assert_eq!(premium.usage.analyses.limit, None);
    assert_eq!(premium.usage.analyses.remaining, None);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["tier"], "free");
    assert!(json["usage"]["messages"]["limit"].is_number());
    assert!(json.get("isUpgraded").is_none());
}

#[tokio::test]
async fn test_upgraded_flag_for_returning_guest() {
    let h = setup_with(Vec::new(), true);
    let snapshot = h.service.get_quota_status(&Actor::Guest).await;
    assert_eq!(snapshot.is_upgraded, Some(true));

    let h = setup_with(Vec::new(), false);
    let snapshot = h.service.get_quota_status(&Actor::Guest).await;
    assert_eq!(snapshot.is_upgraded, Some(false));
}

#[tokio::test]
async fn test_guest_counter_survives_deletion() {
    let h = setup(Vec::new());
    let guest = Actor::Guest;

    for id in ["d1", "d2", "d3"] {
        h.entities.inner.upsert(TrackedItem::new(id)).await;
        h.service.record_guest_item(&guest).await.unwrap();
    }
    h.entities.inner.delete("d2").await;

    // max(3 counted, 2 remaining)
    assert_eq!(h.service.guest_recordings_used().await, 3);
    assert!(!h.service.can_record_now(&guest).await);
    assert!(h.service.can_record_now(&Actor::user("u1", Tier::Free)).await);
}

#[tokio::test]
async fn test_guest_counter_seeded_from_existing_items() {
    let h = setup(vec![TrackedItem::new("old1"), TrackedItem::new("old2")]);
    let guest = Actor::Guest;

    assert!(h.service.can_record_now(&guest).await);
    assert_eq!(h.service.guest_recordings_used().await, 2);

    h.entities.inner.upsert(TrackedItem::new("new")).await;
    assert_eq!(h.service.record_guest_item(&guest).await.unwrap(), 3);

    h.entities.inner.delete("old1").await;
    assert_eq!(h.service.guest_recordings_used().await, 3);
}

#[tokio::test]
async fn test_guest_counter_write_failure_propagates() {
    let h = setup(Vec::new());
    h.store.set_fail_writes(true);

    let result = h.service.record_guest_item(&Actor::Guest).await;
    assert!(matches!(result, Err(QuotaError::Storage(_))));
}

#[tokio::test]
async fn test_signed_in_recordings_not_counted() {
    let h = setup(Vec::new());
    let free = Actor::user("u1", Tier::Free);
    assert_eq!(h.service.record_guest_item(&free).await.unwrap(), 0);
    assert_eq!(h.store.get("guest_recording_count").await.unwrap(), None);
}

#[tokio::test]
async fn test_unknown_tier_fails_closed() {
    let h = setup(Vec::new());
    let actor: Actor =
        serde_json::from_str(r#"{"kind":"user","id":"u1","tier":"gold"}"#).unwrap();
    assert_eq!(actor.tier(), Tier::Guest);

    h.service.record_analysis(&TrackedItem::new("d1"), &actor).await;
    h.service.record_analysis(&TrackedItem::new("d2"), &actor).await;
    assert!(!h.service.can_analyze_now(&actor).await);
}

#[tokio::test]
async fn test_reset_local_usage() {
    let h = setup(Vec::new());
    let guest = Actor::Guest;

    h.service.record_analysis(&TrackedItem::new("d1"), &guest).await;
    h.service.record_analysis(&TrackedItem::new("d2"), &guest).await;
    h.service.record_guest_item(&guest).await.unwrap();
    assert!(!h.service.can_analyze_now(&guest).await);

    h.service.reset_local_usage().await.unwrap();

    assert!(h.service.can_analyze_now(&guest).await);
    assert_eq!(h.service.guest_recordings_used().await, 0);
}
