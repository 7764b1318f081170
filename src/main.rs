use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use agentpay::{config::Config, routes::create_router, utils::init_tracing, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);
    info!(mode = config.mode_name(), chain = ?config.chain, "Payment settings");

    // Ledger, verifier and chain client
    let state = AppState::from_config(config.clone()).await?;

    // Create router
    let app = create_router(state);

    // Start server
    let ip = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid HOST {}: {}", config.server.host, e))?;
    let addr = SocketAddr::new(ip, config.server.port);
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
