//! Headless fleet viewer
//!
//! Connects to a monitoring feed, keeps the aggregated fleet state and logs alerts,
//! connection changes and a periodic health summary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fleet_monitor::{
    Config, ConnectionHandle,
    monitoring::{LogSink, MonitorEvent, MonitorHandle, MonitorSink},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fleet-viewer")]
#[command(about = "Headless viewer for a server monitoring feed", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feed endpoint (overrides config file)
    #[arg(short, long, value_name = "URL")]
    url: Option<String>,

    /// Write logs to the data directory instead of stderr
    #[arg(long)]
    log_file: bool,

    /// More verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn log_filter(verbose: bool) -> filter::Targets {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    filter::Targets::new()
        .with_targets(vec![("fleet_monitor", level), (env!("CARGO_CRATE_NAME"), level)])
}

fn init(args: &Args) {
    let filter = log_filter(args.verbose);

    let log_file = args.log_file.then(open_log_file).flatten();

    match log_file {
        Some(file) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_target(false)
                    .with_ansi(false),
            )
            .with(filter)
            .init(),
        None => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .compact()
                    .with_ansi(true),
            )
            .with(filter)
            .init(),
    }
}

fn open_log_file() -> Option<std::fs::File> {
    let log_path = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleet-monitor")
        .join("viewer.log");

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok()
}

/// Log one line per known server
async fn log_summary(monitor: &MonitorHandle) {
    let servers = monitor.server_ids().await;
    if servers.is_empty() {
        debug!("no servers reported yet");
        return;
    }

    for server_id in servers {
        let snapshot = monitor.get_server_metrics(server_id.as_str()).await;
        let healthy = monitor.is_server_healthy(server_id.as_str()).await;

        let metrics = snapshot
            .metrics
            .iter()
            .map(|(metric, value)| format!("{metric}={value:.1}%"))
            .collect::<Vec<_>>()
            .join(" ");

        if healthy {
            info!("{server_id}: healthy {metrics}");
        } else {
            warn!("{server_id}: unhealthy {metrics}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init(&args);
    trace!("started with args: {args:?}");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.endpoint = url;
        config.validate()?;
    }

    let connection = ConnectionHandle::spawn(config.endpoint.clone(), config.connection.clone());
    let monitor = MonitorHandle::spawn(&config.monitoring, connection.subscribe().await?);

    let sink: Arc<dyn MonitorSink> = Arc::new(LogSink::new());
    let forwarder = monitor.forward_to(sink);
    let mut events = monitor.subscribe();

    info!("connecting to {}", connection.url());
    connection.connect().await?;

    let mut summary = tokio::time::interval(config.monitoring.summary_interval());
    let mut gave_up = false;

    loop {
        tokio::select! {
            _ = summary.tick() => log_summary(&monitor).await,

            event = events.recv() => match event {
                Ok(MonitorEvent::ReconnectExhausted) => {
                    gave_up = true;
                    break;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
        }
    }

    if let Err(e) = connection.disconnect().await {
        error!("failed to disconnect: {e:#}");
    }
    connection.shutdown().await.ok();
    monitor.shutdown().await.ok();
    forwarder.await.ok();

    if gave_up {
        anyhow::bail!("monitoring feed at {} is unreachable", config.endpoint);
    }

    Ok(())
}
