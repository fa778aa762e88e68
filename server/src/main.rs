use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use server::config::ServerConfig;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting combine-audio server...");

    // Load configuration from environment
    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, concat={:?}, temp_dir={}, voice={}",
        config.port,
        config.concat_backend,
        config.temp_dir.display(),
        config.elevenlabs.voice_id
    );

    let state = AppState::from_config(&config)?;
    let app = server::app(state, &config)?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
