//! # Wacast — Multi-Account WhatsApp Campaign Engine
//!
//! Claim-based campaign dispatch across a pool of WhatsApp Business
//! accounts: randomized pacing, per-account daily caps, working-hour
//! windows, and restart-safe resume.
//!
//! Usage:
//!   wacast                               # Run with ~/.wacast/config.toml
//!   wacast --config ./wacast.toml        # Custom config
//!   wacast --db ./campaigns.db           # Override database path

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wacast_core::config::WacastConfig;
use wacast_core::traits::{MessageTransport, Store};
use wacast_core::types::CampaignEvent;
use wacast_db::SqliteStore;
use wacast_scheduler::{CampaignScheduler, EventBus, ScheduledCampaignChecker};
use wacast_transport::CloudApiTransport;

#[derive(Parser)]
#[command(
    name = "wacast",
    version,
    about = "📨 Wacast — Multi-Account WhatsApp Campaign Engine"
)]
struct Cli {
    /// Path to config file (default: ~/.wacast/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "wacast=debug,wacast_scheduler=debug,wacast_db=debug,wacast_transport=debug"
    } else {
        "wacast=info,wacast_scheduler=info,wacast_db=info,wacast_transport=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => WacastConfig::load_from(std::path::Path::new(&expand_path(path)))?,
        None => WacastConfig::load()?,
    };

    let db_path = expand_path(cli.db.as_deref().unwrap_or(&config.database.path));
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Open database and sync configured accounts into it
    let store = SqliteStore::open(std::path::Path::new(&db_path))?;
    for account in &config.transport.accounts {
        store.upsert_account(account.id, &account.label, &account.phone_number_id)?;
    }
    let store: Arc<dyn Store> = Arc::new(store);

    // Connect the sending accounts
    let transport = Arc::new(CloudApiTransport::new(&config.transport));
    let connected = transport.connect_all().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    let total = config.transport.accounts.len();

    println!("📨 Wacast v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {db_path}");
    println!("   📱 Accounts: {connected}/{total} connected");
    println!();
    if connected == 0 && total > 0 {
        tracing::warn!("⚠️  No account came up. Campaigns will idle until one connects.");
    }

    let events = Arc::new(EventBus::new());
    let transport_dyn: Arc<dyn MessageTransport> = transport;
    let scheduler = Arc::new(CampaignScheduler::new(
        store.clone(),
        transport_dyn,
        events.clone(),
        config.scheduler.clone(),
    ));

    // Log campaign progress as it happens
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                CampaignEvent::Progress {
                    campaign_id,
                    contact_id,
                    status,
                    account_id,
                    error,
                } => {
                    tracing::info!(
                        "Campaign {campaign_id}: contact {contact_id} → {} (account {:?}{})",
                        status.as_str(),
                        account_id,
                        error.map(|e| format!(", {e}")).unwrap_or_default()
                    );
                }
                CampaignEvent::Completed { campaign_id } => {
                    tracing::info!("Campaign {campaign_id}: completed");
                }
            }
        }
    });

    // Pick up campaigns that were running before the last shutdown
    scheduler.resume_running_campaigns().await.map_err(|e| anyhow::anyhow!("{e}"))?;

    // Background maintenance: daily counter reset + scheduled campaign launches
    let _midnight = scheduler.spawn_midnight_reset();
    let _checker = ScheduledCampaignChecker::new(
        scheduler.clone(),
        store.clone(),
        config.scheduler.checker_interval_secs,
    )
    .spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
