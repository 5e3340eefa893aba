//! TCP load balancer.
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!   Client ───────────▶│ listener → dispatcher → relay (x2) ──────────┼────▶ Backend
//!                      │               │                              │
//!                      │               ▼                              │
//!                      │          load_balancer ◀── health monitor    │
//!                      │               ▲                              │
//!                      │               └── config reload (file/SIGHUP)│
//!                      └──────────────────────────────────────────────┘
//! ```
//!
//! Startup order: config, logging, balancer, metrics, health monitor,
//! config watcher, listener. Shutdown stops accepting, closes tracked
//! connections and waits for every relay to finish.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use tcp_balancer::config::{load_config, watcher::ConfigWatcher};
use tcp_balancer::health::HealthMonitor;
use tcp_balancer::lifecycle::{Shutdown, Signal, Signals};
use tcp_balancer::load_balancer::Balancer;
use tcp_balancer::net::{Dispatcher, Listener};
use tcp_balancer::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "tcp-balancer", version, about = "Layer-4 TCP load balancer")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "balancer.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    if cli.check {
        println!(
            "{}: ok ({} backends, algorithm {})",
            cli.config.display(),
            config.backends.len(),
            config.algorithm
        );
        return Ok(());
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?cli.config, "tcp-balancer starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let balancer = Arc::new(Balancer::from_config(config));
    let shutdown = Shutdown::new();

    let health = tokio::spawn(HealthMonitor::new(balancer.clone()).run(shutdown.subscribe()));

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
    // Keep the handle alive for the lifetime of the process.
    let _watcher = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, reload only via SIGHUP");
            None
        }
    };
    {
        let balancer = balancer.clone();
        tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                balancer.reload(config);
            }
        });
    }

    let dispatcher = tokio::spawn(Dispatcher::new(balancer.clone()).run(listener, shutdown.subscribe()));

    let mut signals = Signals::register()?;
    loop {
        match signals.recv().await {
            Signal::Reload => reload(&cli.config, &balancer),
            Signal::Terminate => {
                shutdown.trigger();
                break;
            }
        }
    }

    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "Dispatcher task failed");
    }
    let _ = health.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn reload(path: &Path, balancer: &Balancer) {
    match load_config(path) {
        Ok(config) => {
            balancer.reload(config);
        }
        Err(e) => tracing::error!(
            path = ?path,
            error = %e,
            "Failed to reload config, keeping current configuration"
        ),
    }
}
