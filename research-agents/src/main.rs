use anyhow::{Context, Result};
use clap::Parser;
use monitoring::{CycleTrigger, EvolutionTracker, HealthServer, HealthState};
use research_agents::{build_roster, AgentExecutor, Orchestrator, Scheduler, ServiceConfig, DEFAULT_CONFIG_PATH};
use signal_generation::{InMemoryStorage, SignalFusionEngine, SignalStorage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::fmt;

#[derive(Debug, Parser)]
#[command(name = "research-agents", about = "Periodic multi-producer market analysis")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "ANALYSIS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single cycle over all markets, print the reports and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(&args.config)?;

    // Initialize logging
    fmt().with_max_level(config.log_level()).init();

    info!("Loaded configuration from {}", args.config.display());

    let storage: Arc<dyn SignalStorage> = Arc::new(InMemoryStorage::with_config(config.storage.clone()));
    let health = Arc::new(HealthState::new(config.health.clone()));

    let roster = build_roster(&config.agents);
    if roster.is_empty() {
        warn!("No producers enabled; every cycle will end without a fused result");
    }
    info!("Roster: {}", roster.names().join(", "));

    let orchestrator = Arc::new(
        Orchestrator::new(
            roster,
            AgentExecutor::new(config.executor.clone()),
            SignalFusionEngine::new(config.fusion.clone()),
            EvolutionTracker::new(config.evolution.clone()),
            Arc::clone(&storage),
        )
        .with_health(Arc::clone(&health)),
    );
    if config.markets.is_empty() {
        warn!("No markets configured; add [[markets]] entries to {}", args.config.display());
    }
    orchestrator.add_markets(config.markets.clone());

    if args.once {
        let reports = orchestrator.run_scheduled_cycle().await?;
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    let cycle_orchestrator = Arc::clone(&orchestrator);
    let scheduler = Scheduler::new(move || {
        let orchestrator = Arc::clone(&cycle_orchestrator);
        async move { orchestrator.run_scheduled_cycle().await.map(|_| ()) }
    });

    let interval_ms = config.scheduler.interval_ms;
    scheduler.start(interval_ms).context("Failed to start scheduler")?;
    health.set_scheduler_running(true, interval_ms);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let trigger: Arc<dyn CycleTrigger> = orchestrator.clone();
    let server = HealthServer::new(Arc::clone(&health), config.health.bind_addr).with_trigger(trigger);
    let server_task = tokio::spawn(server.run(async {
        let _ = shutdown_rx.await;
    }));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    scheduler.stop().await;
    health.set_scheduler_running(false, interval_ms);

    let _ = shutdown_tx.send(());
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Health server failed: {:#}", e),
        Err(e) => error!("Health server task panicked: {}", e),
    }

    let stats = storage.stats().await?;
    info!(
        "Stopped after {} cycles: {} signals, {} fused results, {} evolution events stored",
        scheduler.cycles_started(),
        stats.total_signals,
        stats.total_fused,
        stats.total_evolution_events
    );

    Ok(())
}
