//! Domain types shared by every quota component
//!
//! Actors and tracked items are supplied by collaborators (auth and the
//! entity store); this crate only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entitlement level determining quota limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Tier {
    Guest,
    Free,
    Premium,
}

impl Tier {
    /// Parse a tier name. Unknown names fail closed to the most restrictive tier.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "premium" => Tier::Premium,
            "free" => Tier::Free,
            "guest" => Tier::Guest,
            other => {
                tracing::warn!("Unrecognized tier '{}', treating as guest", other);
                Tier::Guest
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Guest => "guest",
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl From<String> for Tier {
    fn from(value: String) -> Self {
        Tier::parse(&value)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current user context for a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Actor {
    /// Anonymous, device-scoped actor
    Guest,
    /// Signed-in user; the tier is read from auth, never computed here
    User { id: String, tier: Tier },
}

impl Actor {
    pub fn user(id: impl Into<String>, tier: Tier) -> Self {
        Actor::User {
            id: id.into(),
            tier,
        }
    }

    /// Map an optional signed-in user to an actor (`None` is a guest)
    pub fn from_session(session: Option<(String, Tier)>) -> Self {
        match session {
            Some((id, tier)) => Actor::User { id, tier },
            None => Actor::Guest,
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Actor::Guest => Tier::Guest,
            Actor::User { tier, .. } => *tier,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Actor::Guest)
    }
}

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The person exploring the item
    #[serde(alias = "user")]
    Actor,
    Assistant,
}

/// One message in an item's exploration chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    #[serde(default)]
    pub text: String,
}

impl ChatTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// The metered domain object (a dream record)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    pub id: String,
    #[serde(default)]
    pub is_analyzed: bool,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exploration_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
}

impl TrackedItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_analyzed: false,
            analyzed_at: None,
            exploration_started_at: None,
            chat_history: Vec::new(),
        }
    }

    /// Whether the item's history proves an analysis happened.
    ///
    /// Both the flag and the timestamp are required; a flag without a
    /// timestamp is not trusted.
    pub fn counts_as_analyzed(&self) -> bool {
        self.is_analyzed && self.analyzed_at.is_some()
    }

    /// Whether the item's history proves an exploration happened
    pub fn counts_as_explored(&self) -> bool {
        self.exploration_started_at.is_some()
            || self
                .chat_history
                .iter()
                .any(|turn| turn.role == TurnRole::Assistant)
    }

    /// Number of actor-authored chat turns
    pub fn actor_message_count(&self) -> u32 {
        saturating_count(
            self.chat_history
                .iter()
                .filter(|turn| turn.role == TurnRole::Actor)
                .count(),
        )
    }
}

/// Collection size as a usage count, clamped at `u32::MAX`
pub(crate) fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Item a per-item check refers to
#[derive(Debug, Clone, PartialEq)]
pub enum ItemTarget {
    /// Look the item up by id in the entity store
    Id(String),
    /// The caller already holds the item
    Item(TrackedItem),
}

impl ItemTarget {
    pub fn id(&self) -> &str {
        match self {
            ItemTarget::Id(id) => id,
            ItemTarget::Item(item) => &item.id,
        }
    }
}

impl From<TrackedItem> for ItemTarget {
    fn from(item: TrackedItem) -> Self {
        ItemTarget::Item(item)
    }
}

/// Usage of one metered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub used: u32,
    /// `None` means unlimited
    pub limit: Option<u32>,
    /// `None` when unlimited
    pub remaining: Option<u32>,
}

impl UsageEntry {
    pub fn new(used: u32, limit: Option<u32>) -> Self {
        Self {
            used,
            limit,
            remaining: limit.map(|limit| limit.saturating_sub(used)),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Usage of the three metered actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageBreakdown {
    pub analyses: UsageEntry,
    pub explorations: UsageEntry,
    pub messages: UsageEntry,
}

/// Computed view of an actor's quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub tier: Tier,
    pub usage: UsageBreakdown,
    /// Set for guests whose device already belongs to a registered account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_upgraded: Option<bool>,
}
