use anyhow::{Context, Result};
use clap::Parser;
use quota_service::config::{Config, StorageMode};
use quota_service::server::Server;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// User management API with a per-user request quota
#[derive(Debug, Parser)]
#[command(name = "quota-service", version, about)]
struct Cli {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Storage backends to use (overrides STORAGE_MODE)
    #[arg(long, value_enum)]
    storage_mode: Option<StorageMode>,

    /// Log level for this crate (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(storage_mode) = cli.storage_mode {
        config.storage_mode = storage_mode;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("quota_service={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting quota service");
    tracing::info!(
        "Configuration: bind_addr={}, storage_mode={}, database_url={}",
        config.bind_addr,
        config.storage_mode,
        config.database_url
    );

    let server = Server::new(config)
        .await
        .context("Failed to create server")?;

    server.run().await.context("Server error")?;

    Ok(())
}
