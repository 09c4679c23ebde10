//! Identity lookups needed by quota decisions

use crate::error::Result;

/// Auth collaborator queries
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Whether this device's fingerprint already maps to a registered account
    async fn device_has_account(&self) -> Result<bool>;
}

/// Identity service with a fixed answer
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    device_registered: bool,
}

impl StaticIdentity {
    pub fn new(device_registered: bool) -> Self {
        Self { device_registered }
    }
}

#[async_trait::async_trait]
impl IdentityService for StaticIdentity {
    async fn device_has_account(&self) -> Result<bool> {
        Ok(self.device_registered)
    }
}
