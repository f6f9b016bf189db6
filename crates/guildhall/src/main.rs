//! Guildhall server entry point.
//!
//! Loads configuration, opens the record store, restores guilds and friend
//! lists, then serves the sync gateway until a termination signal arrives.

mod cli;
mod config;
mod gateway_server;
mod logging;
mod signals;

use anyhow::{anyhow, Context};
use cli::CliArgs;
use config::AppConfig;
use gateway_server::GatewayServer;
use guildhall_core::{
    EventBus, GroupRegistry, GroupStore, JsonFileStore, MemoryStore, Notification, SyncGateway,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// Application
// ============================================================================

pub struct Application {
    config: AppConfig,
    registry: Arc<GroupRegistry>,
    gateway: Arc<SyncGateway>,
    events: Arc<EventBus>,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // CLI overrides
        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(data_dir) = args.data_dir {
            config.server.data_dir = data_dir.to_string_lossy().to_string();
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        display_banner();

        let store: Arc<dyn GroupStore> = if config.server.ephemeral {
            warn!("⚠️ Ephemeral mode: guild and friend records will not survive a restart");
            Arc::new(MemoryStore::new())
        } else {
            let store = JsonFileStore::open(config.data_dir())
                .await
                .with_context(|| format!("Failed to open data directory {}", config.server.data_dir))?;
            Arc::new(store)
        };

        let events = Arc::new(EventBus::new());
        events
            .on_any(|notification: Notification| {
                debug!(
                    "📣 {} -> {} recipients",
                    notification.kind.name(),
                    notification.recipients.len()
                );
                Ok(())
            })
            .await;

        let registry = Arc::new(GroupRegistry::new(config.rules.clone(), store, events.clone()));
        let restored = registry.load().await.context("Failed to restore guild records")?;
        info!("📂 Restored {} guilds from {}", restored, config.server.data_dir);

        let gateway = Arc::new(SyncGateway::new(
            registry.clone(),
            config.server.dedup_cache_size,
        ));

        info!(
            "📂 Config: {} | Node: {}",
            args.config_path.display(),
            config.server.node_name
        );

        Ok(Self {
            config,
            registry,
            gateway,
            events,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let rules = self.registry.rules();
        info!("🌟 Starting Guildhall on node {}", self.config.server.node_name);
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!(
            "  🏰 Guilds: {} members to start, level cap {}",
            rules.guilds.default_max_members, rules.guilds.progression.max_level
        );
        info!("  👥 Party size: {}", rules.parties.max_size);
        info!(
            "  📦 Storage: {} slots, upgrades up to {}",
            rules.storage.initial_slots, rules.storage.max_slots_limit
        );
        info!(
            "  💰 Interest: {} every {}s",
            rules.storage.interest_rate, rules.storage.interest_interval_secs
        );

        let addr: SocketAddr = self.config.server.bind_address.parse()?;
        let server = GatewayServer::new(self.gateway.clone());
        let shutdown = server.shutdown_handle();
        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.start(addr).await {
                error!("❌ Sync gateway error: {}", e);
            }
        });

        let mut background = vec![self.spawn_interest_ticker()];
        if let Some(monitor) = self.spawn_monitor() {
            background.push(monitor);
        }

        info!("✅ Guildhall is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let signal = signals::wait_for_shutdown_signal().await?;

        info!("📡 {} received, initiating graceful shutdown...", signal);
        for task in &background {
            task.abort();
        }
        // No receivers left means the listener already stopped
        let _ = shutdown.send(());
        if let Err(e) = server_handle.await {
            warn!("Sync gateway task ended abnormally: {}", e);
        }

        let final_stats = self.registry.shutdown().await;
        let gateway_stats = self.gateway.get_stats();
        let event_stats = self.events.get_stats().await;
        info!("📊 Final Statistics:");
        info!(
            "  - Guilds: {} ({} members)",
            final_stats.guilds, final_stats.guild_members
        );
        info!("  - Parties disbanded: {}", final_stats.parties);
        info!(
            "  - Sync requests: {} executed, {} duplicates, {} rejected",
            gateway_stats.executed, gateway_stats.duplicates, gateway_stats.rejected
        );
        info!(
            "  - Notifications published: {}",
            event_stats.notifications_published
        );
        info!("👋 Guildhall shutdown complete");

        Ok(())
    }

    fn spawn_interest_ticker(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let period = Duration::from_secs(self.registry.rules().storage.interest_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let report = registry.accrue_interest().await;
                if report.failures > 0 {
                    warn!("⚠️ Interest accrual failed for {} guilds", report.failures);
                }
            }
        })
    }

    fn spawn_monitor(&self) -> Option<JoinHandle<()>> {
        let every = self.config.server.stats_interval_secs;
        if every == 0 {
            return None;
        }
        let registry = self.registry.clone();
        let gateway = self.gateway.clone();

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(every));
            let mut last_executed = 0u64;

            loop {
                interval.tick().await;

                let stats = registry.stats().await;
                let sync = gateway.get_stats();
                let executed_this_period = sync.executed - last_executed;
                last_executed = sync.executed;

                info!(
                    "📊 System Health - {} guilds | {} parties | {} friend lists | {} sync requests",
                    stats.guilds, stats.parties, stats.friend_lists, executed_this_period
                );
            }
        }))
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              🏰 GUILDHALL 🏰             ║");
    info!("║         Social Service v{:<10}       ║", version);
    info!("║                                          ║");
    info!("║  Guilds, parties and friend lists        ║");
    info!("║  kept in step across game nodes          ║");
    info!("╚══════════════════════════════════════════╝");
}
