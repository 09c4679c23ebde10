//! CLI for inspecting and exercising quotas
//!
//! Runs the local simulation against a JSON state file and a JSON items file.
//!
//! # Usage
//!
//! ```bash
//! # Show a guest's usage
//! quota-cli status
//!
//! # Show a free user's usage, with message usage on one dream
//! quota-cli --user-id u1 --tier free status --item d1
//!
//! # Ask whether a chat message may be sent
//! quota-cli --user-id u1 --tier free check chat --item d1
//!
//! # Record a finished analysis
//! quota-cli record analysis --item d1
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use quota_rs::entity::{EntityStore, JsonFileEntityStore};
use quota_rs::identity::StaticIdentity;
use quota_rs::model::{Actor, ItemTarget, Tier, TrackedItem};
use quota_rs::storage::FileStore;
use quota_rs::{QuotaConfig, QuotaDeps, QuotaService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quota-cli")]
#[command(about = "Inspect and exercise dream analysis quotas", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signed-in user id (omit for a guest)
    #[arg(long, requires = "tier")]
    user_id: Option<String>,

    /// Tier of the signed-in user
    #[arg(long)]
    tier: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the quota snapshot as JSON
    Status {
        /// Dream to measure message usage on
        #[arg(long)]
        item: Option<String>,
    },
    /// Ask whether an action is allowed now
    Check {
        action: CheckAction,
        /// Dream the action applies to
        #[arg(long)]
        item: Option<String>,
    },
    /// Record a completed action
    Record {
        action: RecordAction,
        /// Dream the action applied to
        #[arg(long)]
        item: String,
    },
    /// Count a new guest recording
    RecordGuestItem,
    /// Forget all device-local usage
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum CheckAction {
    Analyze,
    Explore,
    Chat,
    Record,
}

#[derive(Clone, Copy, ValueEnum)]
enum RecordAction {
    Analysis,
    Exploration,
}

fn init_logging(config: &QuotaConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("quota_rs={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn find_item(entities: &dyn EntityStore, id: &str) -> anyhow::Result<TrackedItem> {
    entities
        .list_items()
        .await?
        .into_iter()
        .find(|item| item.id == id)
        .ok_or_else(|| anyhow::anyhow!("Item {} not found", id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => QuotaConfig::from_file(path)?,
        None => QuotaConfig::development(),
    };
    config.apply_env()?;
    config.validate()?;

    init_logging(&config);
    info!("Starting quota-cli v{}", env!("CARGO_PKG_VERSION"));

    let actor = Actor::from_session(
        cli.user_id
            .zip(cli.tier.as_deref().map(Tier::parse)),
    );

    let entities: Arc<dyn EntityStore> =
        Arc::new(JsonFileEntityStore::new(&config.storage.items_path));
    let deps = QuotaDeps {
        store: Arc::new(FileStore::open(&config.storage.state_path).await?),
        entities: entities.clone(),
        identity: Arc::new(StaticIdentity::new(config.identity.device_registered)),
        backend: None,
        policy: config.policy.clone(),
    };
    let service = QuotaService::new(config.mode, deps)?;

    match cli.command {
        Commands::Status { item } => {
            let target = item.map(ItemTarget::Id);
            let snapshot = service.get_quota_status_for(&actor, target.as_ref()).await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Check { action, item } => {
            let target = item.map(ItemTarget::Id);
            let allowed = match action {
                CheckAction::Analyze => service.can_analyze_now(&actor).await,
                CheckAction::Explore => service.can_explore_now(target.as_ref(), &actor).await,
                CheckAction::Chat => service.can_chat_now(target.as_ref(), &actor).await,
                CheckAction::Record => service.can_record_now(&actor).await,
            };
            if allowed {
                println!("✓ allowed");
            } else {
                println!("✗ quota exhausted");
                std::process::exit(1);
            }
        }
        Commands::Record { action, item } => {
            let item = find_item(entities.as_ref(), &item).await?;
            let count = match action {
                RecordAction::Analysis => service.record_analysis(&item, &actor).await,
                RecordAction::Exploration => service.record_exploration(&item, &actor).await,
            };
            println!("✓ recorded, total {}", count);
        }
        Commands::RecordGuestItem => {
            let total = service.record_guest_item(&actor).await?;
            println!("✓ guest recordings: {}", total);
        }
        Commands::Reset => {
            service.reset_local_usage().await?;
            println!("✓ local usage reset");
        }
    }

    Ok(())
}
