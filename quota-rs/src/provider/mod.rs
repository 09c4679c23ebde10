//! Usage provider abstraction
//!
//! A provider computes "how much has this actor used" and "may this actor do
//! it again" from one data source. Two implementations share the contract:
//! - [`local`]: Simulation built on the entity store and the usage ledger
//! - [`remote`]: Delegates to the backend of record
//!
//! None of these methods fail: lookups that cannot be resolved count as zero
//! usage and are logged.

pub mod local;
pub mod remote;

pub use local::LocalProvider;
pub use remote::{BackendClient, RemoteProvider};

use crate::model::{Actor, ItemTarget, TrackedItem};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which provider the process runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Local-only simulation
    #[default]
    Simulation,
    /// Remote backend of record
    Remote,
}

impl ProviderMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulation" | "sim" | "local" => Some(ProviderMode::Simulation),
            "remote" | "real" => Some(ProviderMode::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderMode::Simulation => f.write_str("simulation"),
            ProviderMode::Remote => f.write_str("remote"),
        }
    }
}

/// Usage provider trait
#[async_trait::async_trait]
pub trait UsageProvider: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Analyses used by the actor
    async fn get_used_analysis_count(&self, actor: &Actor) -> u32;

    /// Exploration sessions started by the actor
    async fn get_used_exploration_count(&self, actor: &Actor) -> u32;

    /// Actor-authored messages in one item's chat; 0 if the item is unknown
    async fn get_used_messages_count(&self, target: Option<&ItemTarget>, actor: &Actor) -> u32;

    /// Whether the actor may analyze another item
    async fn can_analyze_item(&self, actor: &Actor) -> bool;

    /// Whether the actor may explore the target.
    ///
    /// Exploration is a one-time gate: an item that was already explored
    /// always passes.
    async fn can_explore_item(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool;

    /// Whether the actor may send one more message about the target
    async fn can_send_message(&self, target: Option<&ItemTarget>, actor: &Actor) -> bool;

    /// Record a completed analysis, returning the analysis count
    async fn record_analysis(&self, item: &TrackedItem, actor: &Actor) -> u32;

    /// Record a started exploration, returning the exploration count
    async fn record_exploration(&self, item: &TrackedItem, actor: &Actor) -> u32;

    /// Drop cached items and counts so the next read recomputes
    async fn invalidate(&self);
}
