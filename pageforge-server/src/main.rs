use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pageforge_server::config::ServerConfig;
use pageforge_server::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    // JSON logs in production (PAGEFORGE_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("PAGEFORGE_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("pageforge_server=info".parse()?)
        .add_directive("pageforge_core=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig::parse();
    let orchestrator = config.orchestrator()?;
    if config.dry_run {
        tracing::warn!("Dry run: publishing to memory with a canned model reply");
    }

    let state = Arc::new(AppState {
        secret: config.app_secret.clone(),
        orchestrator: Arc::new(orchestrator),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!(
        addr = %config.listen_addr,
        provider = ?config.llm_provider,
        owner = %config.github_username,
        "Starting pageforge-server"
    );
    axum::serve(listener, web::router(state))
        .await
        .context("HTTP server failed")
}
