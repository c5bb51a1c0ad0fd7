//! Proxmox provisioner - main entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use proxmox_provisioner::{
    config::Config, orchestrator::RequestLifecycleManager, proxmox::SessionManager,
    store::PostgresStore,
};

#[derive(Parser, Debug)]
#[command(name = "proxmox-provisioner")]
#[command(about = "Create Proxmox LXC containers for approved requests")]
#[command(version)]
struct Args {
    /// Run a single pass and exit (the default)
    #[arg(long, conflicts_with = "interval_secs")]
    once: bool,

    /// Log the requests a run would provision and the ids they would get, then exit
    #[arg(long)]
    dry_run: bool,

    /// Repeat the run every N seconds instead of exiting
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("proxmox_provisioner=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Loaded configuration for node {} at {}",
        config.proxmox.node,
        config.proxmox.base_url
    );

    let store = PostgresStore::connect(&config.database).await?;
    store.run_migrations().await?;
    tracing::info!("Database connected and migrations applied");

    let sessions = SessionManager::new(config.proxmox.clone())?;
    let manager = RequestLifecycleManager::new(sessions, Arc::new(store), config.provisioning);

    if args.dry_run {
        let plan = manager.dry_run().await?;
        tracing::info!("Dry run: {} request(s) eligible", plan.len());
        return Ok(());
    }

    let Some(secs) = args.interval_secs else {
        let summary = manager.run().await?;
        tracing::info!(run_id = %summary.run_id, "Finished: {}", summary);
        return Ok(());
    };

    tracing::info!("Running every {}s, Ctrl-C to stop", secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                return Ok(());
            }
        }

        match manager.run().await {
            Ok(summary) => tracing::info!(run_id = %summary.run_id, "Finished: {}", summary),
            Err(e) if e.is_auth_failure() => return Err(e.into()),
            Err(e) => tracing::error!("Run failed, retrying next interval: {}", e),
        }
    }
}
