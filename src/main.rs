use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use displayhub::{config::ServerConfig, discovery, origin::OriginPolicy, server, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // a missing .env is fine
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "displayhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load()?;
    tracing::info!("Starting display server on port {}", config.port);
    tracing::info!("Serving results from {}", config.results_dir.display());
    tracing::info!("Admin UI language: {}", config.language);

    if let Err(e) = tokio::fs::create_dir_all(&config.results_dir).await {
        tracing::warn!(
            "Could not create results directory {}: {}",
            config.results_dir.display(),
            e
        );
    }

    let origin_policy = Arc::new(OriginPolicy::from_env());
    let port = config.port;
    let advertise = config.discovery;
    let state = Arc::new(AppState::new(config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    // Discovery failure is not fatal; displays can still connect by address
    let advertisement = if advertise {
        match discovery::Advertisement::start(port) {
            Ok(advertisement) => Some(advertisement),
            Err(e) => {
                tracing::warn!("mDNS advertisement unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let result = server::serve(listener, state, origin_policy, server::shutdown_signal()).await;

    if let Some(advertisement) = advertisement {
        advertisement.stop();
    }
    tracing::info!("Server stopped");

    result.map_err(Into::into)
}
