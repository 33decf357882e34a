use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cashout_arena_server::config::ServerConfig;
use cashout_arena_server::lobby::RoomManager;
use cashout_arena_server::metrics::{self, Metrics};
use cashout_arena_server::net::session::SessionRegistry;
use cashout_arena_server::net::transport::WebTransportServer;
use cashout_arena_server::progression::sink_from_env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Cashout Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: {}:{}, max_rooms={}, tick_rate={}, max_sessions={}",
        config.bind_address,
        config.port,
        config.max_rooms,
        config.arena.tick_rate,
        config.arena.max_sessions
    );

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Shared state
    let rooms = Arc::new(RwLock::new(RoomManager::new(
        config.max_rooms,
        config.arena.clone(),
        metrics.clone(),
        sink_from_env(),
    )));
    let registry = Arc::new(Mutex::new(SessionRegistry::new()));

    let server = WebTransportServer::new(config.clone(), rooms.clone(), registry, metrics.clone()).await?;

    info!("Server ready on https://{}", server.bind_addr());
    info!("Certificate hash: {}", server.cert_hash());
    info!(
        "Chrome flag: --ignore-certificate-errors-spki-list={}",
        server.cert_hash()
    );

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    rooms.write().await.shutdown_all_rooms().await;
    info!("Server stopped");

    Ok(())
}
