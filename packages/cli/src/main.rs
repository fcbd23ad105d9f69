//! `queue-monitor`: watch a procrastinate job queue from the terminal.

use std::path::PathBuf;

use actors::{MonitorArgs, MonitorMessage, start_monitor};
use anyhow::Context;
use clap::Parser;
use db::{PgConnector, PoolSettings};
use queue_core::MonitorConfig;
use tracing_subscriber::EnvFilter;

mod config_path;
mod log_view;

use log_view::LogView;

#[derive(Parser, Debug)]
#[command(name = "queue-monitor", version, about = "Live read-only view of a procrastinate job queue")]
struct Args {
    /// Config file (default: $QUEUE_MONITOR_CONFIG, then the user config dir, then ./config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Queue to watch instead of the connection's default queue
    #[arg(short, long)]
    queue: Option<String>,

    /// Connection profile to use instead of the first one listed
    #[arg(short = 'n', long)]
    connection: Option<String>,

    /// Log filter, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let path = config_path::resolve(args.config.as_deref())?;
    let config = MonitorConfig::load(&path)?;
    tracing::info!("Loaded config from {}", path.display());

    let connection = match &args.connection {
        Some(name) => config.connection(name)?.name.clone(),
        None => config
            .connections
            .first()
            .map(|c| c.name.clone())
            .context("no connections configured")?,
    };

    let monitor_args = MonitorArgs::new(PgConnector::new(PoolSettings::default()), config, connection)
        .with_queue(args.queue)
        .with_sink(LogView::default());
    let (monitor, mut handle) = start_monitor(monitor_args).await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            tracing::info!("Interrupted, shutting down");
            let _ = monitor.send_message(MonitorMessage::Shutdown);
            handle.await.context("monitor task failed")?;
        }
        finished = &mut handle => {
            finished.context("monitor task failed")?;
        }
    }

    Ok(())
}
