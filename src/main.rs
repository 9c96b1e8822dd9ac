use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tenderbridge::config::Config;
use tenderbridge::server::{self, AppState};
use tenderbridge::store::InMemoryTenderStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env next to the binary first (services may start with any CWD),
    // then fall back to dotenvy's default CWD search.
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.exists());
    match beside_exe {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    // Missing upstream credentials are fatal here, before any route exists.
    let config = Config::load().inspect_err(|e| tracing::error!("{e}"))?;

    tracing::info!(
        upstream = config.upstream.base_url,
        listen = config.listen_addr,
        session_ceiling_secs = config.poll.session_ceiling_secs,
        "tenderbridge starting"
    );

    let shutdown = CancellationToken::new();
    let store = Arc::new(InMemoryTenderStore::new());
    let state = AppState::from_config(&config, store, shutdown.clone())?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {e}");
            return;
        }
        tracing::info!("shutdown requested");
        signal_token.cancel();
    });

    server::serve(&config.listen_addr, state, shutdown).await?;

    tracing::info!("tenderbridge shutting down");
    Ok(())
}
