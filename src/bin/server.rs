//! HTTP server for the question-answering engine.

use anyhow::Result;
use clap::Parser;
use nlq_engine::config::AppConfig;
use nlq_engine::server::{serve, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq-server")]
#[command(about = "HTTP API answering natural-language questions over a SQLite database")]
struct Args {
    /// Bind address (overrides APP_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port (overrides APP_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Allow running without an API key, using canned model answers
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let mut config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate(args.offline)?;
    if config.llm.is_offline() {
        warn!("No API key configured, running with canned model answers");
    }

    info!(
        database = %config.database_path.display(),
        metadata = %config.metadata_dir.display(),
        model = %config.llm.model,
        "Starting server"
    );
    let state = Arc::new(AppState::build(&config).await?);
    serve(state, &format!("{}:{}", config.host, config.port)).await?;
    Ok(())
}
