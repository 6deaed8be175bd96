//! Replica router daemon.
//!
//! Loads the router configuration, probes every configured node in the
//! background and reports cluster health. Query dispatch is a library
//! concern; the daemon only runs the routing core with no executor.
//!
//! ```text
//!   config file / ROUTER_* env
//!            │
//!            ▼
//!   ┌─────────────────┐   reload   ┌──────────────┐
//!   │  Router (core)  │◀───────────│ConfigWatcher │
//!   │ registry+health │            └──────────────┘
//!   └────────┬────────┘
//!            │ probes (TcpProber)
//!            ▼
//!   primary ─ replica ─ replica ...
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use replica_router::config::watcher::ConfigWatcher;
use replica_router::config::{load_config, load_from_env, RouterConfig};
use replica_router::lifecycle::signals::spawn_signal_handler;
use replica_router::lifecycle::Shutdown;
use replica_router::observability::{logging, metrics};
use replica_router::{Router, TcpProber};

#[derive(Debug, Parser)]
#[command(name = "replica-router", version, about = "Adaptive read-replica query router")]
struct Cli {
    /// TOML configuration file. Without it, configuration comes from ROUTER_* variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes.
    #[arg(long)]
    watch: bool,

    /// Probe every node once, print the status as JSON and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between status log lines.
    #[arg(long, default_value_t = 30)]
    status_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config: RouterConfig = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    logging::init(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        primary = %config.primary.url,
        replicas = config.replicas.urls.len(),
        strategy = %config.strategy,
        "replica-router starting"
    );

    // The daemon routes nothing itself, so the router has no executor.
    let router = Arc::new(Router::new(&config, ())?);
    let prober = TcpProber::new(Duration::from_millis(config.health_check.probe_timeout_ms));

    if cli.once {
        let monitor = router.health_monitor(prober);
        for node in router.registry().list_nodes() {
            monitor.probe_once(&node).await;
        }
        println!("{}", serde_json::to_string_pretty(&router.status())?);
        return Ok(());
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(shutdown.clone());
    let monitor = router.spawn_health_monitor(prober, shutdown.subscribe());
    let sweeper = router.spawn_session_sweeper(shutdown.subscribe());

    let (_watcher, mut updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (Some(watcher.run(config.clone())?), Some(rx))
        }
        _ => (None, None),
    };

    let mut shutdown_rx = shutdown.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(cli.status_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = router.status();
                tracing::info!(
                    total_replicas = status.total_replicas,
                    healthy_replicas = status.healthy_replicas,
                    draining_replicas = status.draining_replicas,
                    health_score_percent = status.health_score_percent,
                    "Cluster status"
                );
            }
            Some(new_config) = next_update(&mut updates) => {
                router.apply_config(&new_config);
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    let _ = tokio::join!(monitor, sweeper);
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn next_update(
    updates: &mut Option<tokio::sync::mpsc::UnboundedReceiver<RouterConfig>>,
) -> Option<RouterConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
