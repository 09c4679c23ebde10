//! Tier quota policy
//!
//! Maps each tier to its limits. Only provider implementations (and the
//! service snapshot) read this table, so changing a limit never touches
//! call sites.

use crate::error::{QuotaError, Result};
use crate::model::Tier;
use serde::{Deserialize, Serialize};

/// Metered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaAction {
    /// Dream analyses (lifetime, distinct items)
    Analysis,
    /// Dream exploration sessions (lifetime, distinct items)
    Exploration,
    /// Chat messages within one item's exploration
    Message,
    /// Items recorded by a guest on this device
    Recording,
}

impl QuotaAction {
    pub fn description(&self) -> &'static str {
        match self {
            QuotaAction::Analysis => "dream analyses",
            QuotaAction::Exploration => "dream explorations",
            QuotaAction::Message => "chat messages per dream",
            QuotaAction::Recording => "guest recordings",
        }
    }
}

/// Limits for one tier; `None` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub analyses: Option<u32>,
    pub explorations: Option<u32>,
    pub messages: Option<u32>,
    #[serde(default)]
    pub recordings: Option<u32>,
}

impl TierLimits {
    pub const UNLIMITED: TierLimits = TierLimits {
        analyses: None,
        explorations: None,
        messages: None,
        recordings: None,
    };

    pub fn limit(&self, action: QuotaAction) -> Option<u32> {
        match action {
            QuotaAction::Analysis => self.analyses,
            QuotaAction::Exploration => self.explorations,
            QuotaAction::Message => self.messages,
            QuotaAction::Recording => self.recordings,
        }
    }
}

/// Tier to limits map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    pub guest: TierLimits,
    pub free: TierLimits,
    pub premium: TierLimits,
}

impl Default for PolicyTable {
    fn default() -> Self {
        PolicyTable {
            guest: TierLimits {
                analyses: Some(2),
                explorations: Some(1),
                messages: Some(20),
                recordings: Some(3),
            },
            free: TierLimits {
                analyses: Some(5),
                explorations: Some(2),
                messages: Some(20),
                recordings: None,
            },
            premium: TierLimits::UNLIMITED,
        }
    }
}

impl PolicyTable {
    pub fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Guest => self.guest,
            Tier::Free => self.free,
            Tier::Premium => self.premium,
        }
    }

    pub fn limit(&self, tier: Tier, action: QuotaAction) -> Option<u32> {
        self.limits(tier).limit(action)
    }

    /// Whether `used` leaves room for one more `action` on `tier`
    pub fn allows(&self, tier: Tier, action: QuotaAction, used: u32) -> bool {
        match self.limit(tier, action) {
            Some(limit) => used < limit,
            None => true,
        }
    }

    /// Reject tables where a finite limit is zero (the action could never run)
    pub fn validate(&self) -> Result<()> {
        for tier in [Tier::Guest, Tier::Free, Tier::Premium] {
            let limits = self.limits(tier);
            for action in [
                QuotaAction::Analysis,
                QuotaAction::Exploration,
                QuotaAction::Message,
                QuotaAction::Recording,
            ] {
                if limits.limit(action) == Some(0) {
                    return Err(QuotaError::Config(format!(
                        "{} limit for {} tier must be positive or unlimited",
                        action.description(),
                        tier
                    )));
                }
            }
        }
        Ok(())
    }
}
