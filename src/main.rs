use anyhow::anyhow;
use tokio::net::TcpListener;

use dialflow::{ServerConfig, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Load configuration; a missing required credential is a fatal startup
    // error (exit code 1)
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();
    println!("Starting server on {address}");

    // Create application state (shared provider clients, session registry)
    let app_state = AppState::new(config);

    // Combine all routes: public + media streams + control-plane hooks
    let app = routes::create_public_router()
        .merge(routes::create_stream_router())
        .merge(routes::create_hook_router())
        .with_state(app_state);

    let listener = TcpListener::bind(&address).await?;
    println!("Server listening on {address}");

    axum::serve(listener, app).await?;

    Ok(())
}
