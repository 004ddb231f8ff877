use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pharos::{PharosConfig, Scheduler, StatusServer};

#[derive(Parser, Debug)]
#[command(name = "pharosd")]
#[command(about = "Run shell probes on an interval and serve their health as JSON")]
struct Args {
    /// Path to the watcher configuration file
    #[arg(short, long, default_value = "pharos.toml")]
    config: PathBuf,

    /// Address for the status server (overrides `[server].listen`)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = PharosConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let dashboard = Arc::new(config.to_dashboard()?);
    let listen = args.listen.unwrap_or(config.server.listen);

    let scheduler = Scheduler::new(Arc::new(config.spawner()));
    let checks = scheduler.start(&dashboard);

    let server = StatusServer::bind(listen, dashboard.clone())
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    let server = server.start();

    info!(
        sets = dashboard.sets().len(),
        watchers = checks.len(),
        %listen,
        "pharos running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    server.abort();
    checks.shutdown().await;
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
