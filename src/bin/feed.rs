//! Monitoring feed server
//!
//! Serves `/api/ws/monitoring` and publishes usage samples of the local host.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use fleet_monitor::feed::{
    DEFAULT_PORT, FeedConfig, FeedState, sampler::spawn_sampler, spawn_feed_server,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "fleet-feed")]
#[command(about = "WebSocket feed of server metrics", long_about = None)]
struct Args {
    /// Address to bind
    #[arg(short, long, env = "FEED_ADDR", default_value = "0.0.0.0")]
    addr: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "FEED_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Server id used for local samples (default: host name)
    #[arg(short, long, env = "FEED_SERVER_ID")]
    server_id: Option<String>,

    /// Seconds between local samples
    #[arg(short, long, default_value_t = 5)]
    interval: u64,

    /// Only relay, do not sample the local host
    #[arg(long)]
    no_sampler: bool,
}

fn log_filter() -> filter::Targets {
    filter::Targets::new().with_targets(vec![
        ("fleet_monitor", LevelFilter::TRACE),
        (env!("CARGO_CRATE_NAME"), LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ])
}

fn init() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(log_filter())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env has to be loaded before clap reads FEED_*
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = FeedConfig {
        bind_addr: SocketAddr::new(args.addr, args.port),
        ..FeedConfig::default()
    };

    let state = FeedState::default();
    let addr = spawn_feed_server(config, state.clone()).await?;
    info!("serving monitoring feed on ws://{addr}/api/ws/monitoring");

    let sampler = (!args.no_sampler).then(|| {
        let server_id = args
            .server_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| String::from("localhost"));
        info!("sampling local host as {server_id} every {}s", args.interval);
        spawn_sampler(state.clone(), server_id, Duration::from_secs(args.interval))
    });

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");

    if let Some(sampler) = sampler {
        sampler.abort();
    }

    Ok(())
}
