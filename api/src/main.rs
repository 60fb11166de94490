use clap::Parser;

use api::config::Cli;
use api::{build_router, ServiceState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    tracing::info!(listen = %cli.listen, storage = ?cli.resolved_storage(), "starting ledger-api");

    let state = ServiceState::bootstrap(&cli)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
