// src/main.rs - Fleet host daemon: wire the core together and run it
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use printfleet::client::DefaultClientFactory;
use printfleet::config::FleetConfig;
use printfleet::events::LogSink;
use printfleet::supervisor::ConnectionSupervisor;

#[derive(Parser)]
#[command(name = "fleet-host", about = "Printer fleet connection service")]
struct Cli {
    /// Path to the fleet configuration file.
    #[arg(short, long, default_value = "fleet.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("starting printfleet host");

    let config = FleetConfig::load(&cli.config).map_err(|e| {
        tracing::error!(path = %cli.config.display(), error = %e, "failed to load fleet configuration");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let settings = config.service.clone();
    let factory = Box::new(DefaultClientFactory::new(settings.clone()));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        factory,
        Arc::new(LogSink),
        settings.clone(),
    ));

    let active: Vec<_> = config.active_printers().cloned().collect();
    let managed = supervisor.load_and_instantiate(&active).await;
    tracing::info!(managed, "fleet loaded");

    // One connect sequence per printer, in parallel; failures surface as
    // progress events, not as task errors.
    let mut connects = Vec::new();
    for id in supervisor.printer_ids().await {
        let supervisor = supervisor.clone();
        connects.push(tokio::spawn(async move {
            if let Err(e) = supervisor.connect_and_monitor(&id).await {
                tracing::error!(printer_id = %id, error = %e, "connect sequence failed");
            }
        }));
    }
    for task in connects {
        let _ = task.await;
    }

    let mut health_interval =
        tokio::time::interval(Duration::from_secs(settings.health_interval_secs));
    health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so the summary starts after
    // one full interval.
    health_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
            _ = health_interval.tick() => {
                let health = supervisor.health_check().await;
                tracing::info!(
                    total = health.total_printers,
                    connected = health.connected_printers,
                    healthy = health.healthy_printers,
                    "fleet health"
                );
            }
        }
    }

    supervisor.shutdown().await;
    tracing::info!("printfleet host stopped");
    Ok(())
}
