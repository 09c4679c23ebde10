//! quota-rs: Usage metering and entitlement enforcement
//!
//! Decides whether an actor (guest, free or premium) may analyze a dream,
//! start a dream exploration, or send another chat message, and records
//! that the action happened.
//!
//! # Features
//!
//! - **Deletion-proof counting**: usage comes from persisted counters that
//!   never go down, and is never reported below what live items show
//! - **Idempotent marks**: counting the same item twice counts it once
//! - **One contract, two backends**: a local simulation and a remote source
//!   of truth implement the same [`provider::UsageProvider`] trait
//! - **Fail-closed tiers**: unknown tier names get the guest limits
//!
//! # Example
//!
//! ```no_run
//! use quota_rs::entity::MemoryEntityStore;
//! use quota_rs::identity::StaticIdentity;
//! use quota_rs::model::Actor;
//! use quota_rs::storage::MemoryStore;
//! use quota_rs::{PolicyTable, ProviderMode, QuotaDeps, QuotaService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let deps = QuotaDeps {
//!         store: Arc::new(MemoryStore::new()),
//!         entities: Arc::new(MemoryEntityStore::new()),
//!         identity: Arc::new(StaticIdentity::new(false)),
//!         backend: None,
//!         policy: PolicyTable::default(),
//!     };
//!     let service = QuotaService::new(ProviderMode::Simulation, deps)?;
//!
//!     if service.can_analyze_now(&Actor::Guest).await {
//!         println!("Analysis allowed");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`model`]: Actors, tracked items and quota snapshots
//! - [`storage`]: Durable key-value backends
//! - [`counter`]: Monotonic guest recording counter
//! - [`ledger`]: Deduplicated analysis/exploration ledger
//! - [`policy`]: Tier limits
//! - [`provider`]: Usage provider trait and implementations
//! - [`service`]: Public facade

pub mod config;
pub mod counter;
pub mod entity;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod model;
pub mod policy;
pub mod provider;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use config::QuotaConfig;
pub use error::{QuotaError, Result};
pub use policy::PolicyTable;
pub use provider::ProviderMode;
pub use service::{QuotaDeps, QuotaService};
