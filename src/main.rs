use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info};
use washboard::{config::Config, routes::create_router, utils::init_logger, AppState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Session-scoped data import and cleaning server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to bind; overrides HOST.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind; overrides PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let _log_guard = init_logger(config.log_dir.as_deref());
    info!("Configuration loaded: {:?}", config.server);

    let state = AppState::new(config.clone())?;

    // Expire idle sessions and stale rate-limit buckets
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sweeper.sessions.cleanup_idle_sessions().await;
            sweeper.limiter.shrink();
            if removed > 0 {
                debug!(removed, "expired idle sessions");
            }
        }
    });

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
