mod logs;

use pmotidal::api_rest::{LOGIN_PATH, TidalState, create_router};
use pmotidal::{SessionState, TidalClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logs::init_logging();

    let config = pmoconfig::get_config();
    info!(config_dir = %config.directory(), "Starting PMOTidal");

    // ========== Session Tidal ==========

    let client = Arc::new(TidalClient::from_config_obj(config.as_ref()).await?);

    match client.session_state().await {
        SessionState::Valid => info!("✅ Tidal session ready"),
        state => warn!(?state, "No valid Tidal session, open {} to log in", LOGIN_PATH),
    }

    // ========== Cache de réponses ==========

    let sweep_secs = config.get_response_cache_sweep_secs().unwrap_or(300).max(1);
    let sweeper = client
        .cache()
        .spawn_sweeper(Duration::from_secs(sweep_secs as u64));

    // ========== Serveur HTTP ==========

    let router = create_router(TidalState::new(client.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.get_http_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("🌐 PMOTidal listening on http://{}", addr);
    info!("Press Ctrl+C to stop...");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("PMOTidal stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
