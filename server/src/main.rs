use std::sync::Arc;

use syncroom_server::clock::SystemClock;
use syncroom_server::config::{ConfigError, ServerConfig};
use syncroom_server::routes;
use syncroom_server::state::AppState;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: std::net::SocketAddr, source: std::io::Error },
    #[error("server failed: {0}")]
    Serve(std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    let state = AppState::new(Arc::new(SystemClock), config.outbox_capacity);

    if let Some(dir) = &config.public_dir {
        tracing::info!(dir = %dir.display(), "serving static files");
    }
    let app = routes::app(state, config.public_dir.as_deref());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    tracing::info!(%addr, "syncroom listening");
    axum::serve(listener, app).await.map_err(StartupError::Serve)
}
