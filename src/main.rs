//! DX Spot Feed CLI - Keep a live list of DX spots from a cluster node or WSJT-X.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use dx_spot_feed::{
    client::SourceKind,
    config::Config,
    feed::{FeedCommand, SpotFeed},
    http::{AppState, start_http_server},
    spot::SpotRecord,
    stats::SpotStats,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// DX Spot Feed - Keep a live list of DX spots from a cluster node or WSJT-X
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(short, long, env = "DXFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Identity sent at cluster login
    #[arg(short, long, env = "DXFEED_LOGIN")]
    login: Option<String>,

    /// Source host (cluster node, or multicast group for WSJT-X)
    #[arg(long, env = "DXFEED_HOST")]
    host: Option<String>,

    /// Source port
    #[arg(long, env = "DXFEED_PORT")]
    port: Option<u16>,

    /// Listen for WSJT-X status datagrams instead of a cluster node
    #[arg(long)]
    wsjtx: bool,

    /// Serve metrics and spot queries over HTTP on this port
    #[arg(long, env = "DXFEED_HTTP_PORT")]
    http_port: Option<u16>,

    /// Print each newly stored spot
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum runtime in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_runtime: u64,
}

impl Args {
    /// Apply command line overrides on top of the config file.
    fn apply(&self, config: &mut Config) {
        if self.wsjtx {
            config.source.kind = SourceKind::Wsjtx;
            if self.port.is_none() {
                config.source.port = dx_spot_feed::config::DEFAULT_WSJTX_PORT;
            }
        }
        if let Some(login) = &self.login {
            config.login = login.clone();
        }
        if let Some(host) = &self.host {
            config.source.host = host.clone();
        }
        if let Some(port) = self.port {
            config.source.port = port;
        }
        if let Some(port) = self.http_port {
            config.http.enabled = true;
            config.http.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("DX Spot Feed starting...");
    info!("Login: {}", config.login);
    info!(
        "Source: {:?} {}:{}",
        config.source.kind, config.source.host, config.source.port
    );

    // Create shared statistics
    let stats = Arc::new(SpotStats::new());
    let mut feed = SpotFeed::new(config.feed_config(), Arc::clone(&stats));

    let (snapshot_tx, snapshot_rx) = watch::channel(feed.snapshot(Utc::now()));
    let (command_tx, mut command_rx) = mpsc::channel::<FeedCommand>(32);

    if config.http.enabled {
        let state = AppState {
            stats: Arc::clone(&stats),
            snapshot: snapshot_rx,
            commands: command_tx,
        };
        let port = config.http.port;
        tokio::spawn(async move {
            if let Err(e) = start_http_server(port, state).await {
                error!("HTTP server failed: {}", e);
            }
        });
    }

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx_clone.send(true);
    });

    // Optional max runtime
    if args.max_runtime > 0 {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(args.max_runtime)).await;
            info!("Max runtime reached");
            let _ = shutdown_tx_clone.send(true);
        });
    }

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut stats_tick = tokio::time::interval(Duration::from_secs(config.stats_interval.max(1)));
    stats_tick.tick().await;
    let mut last_status = String::new();

    // Main service loop
    loop {
        tokio::select! {
            // Check for shutdown
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = tick.tick() => {
                let now = Utc::now();
                let newest_before = feed.spots().newest().map(|s| s.spotted_at);
                let report = feed.service(now).await;
                if args.verbose && report.stored > 0 {
                    print_new_spots(feed.spots().spots(), newest_before, report.stored);
                }
                if feed.status() != last_status {
                    info!("Status: {}", feed.status());
                    last_status = feed.status().to_string();
                }
                snapshot_tx.send_replace(feed.snapshot(now));
            }

            Some(command) = command_rx.recv() => {
                feed.apply(command);
                snapshot_tx.send_replace(feed.snapshot(Utc::now()));
            }

            _ = stats_tick.tick(), if config.stats_interval > 0 => {
                println!("\n{}", stats.summary());
            }
        }
    }

    feed.close();

    // Print final statistics
    println!("\n\nFINAL STATISTICS");
    println!("{}", stats.summary());

    Ok(())
}

/// Print spots stored during the last pass, newest last.
fn print_new_spots(
    spots: &[SpotRecord],
    newest_before: Option<chrono::DateTime<Utc>>,
    stored: usize,
) {
    let fresh = spots
        .iter()
        .rev()
        .take(stored)
        .filter(|s| newest_before.is_none_or(|t| s.spotted_at >= t))
        .collect::<Vec<_>>();
    for spot in fresh.into_iter().rev() {
        println!("{}", spot);
    }
}
