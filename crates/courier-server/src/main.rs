mod auth;
mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = configuration::Settings::new()?;
    let addr = settings
        .server
        .socket_addr()
        .context("invalid server address")?;

    let state = state::AppState::from_settings(settings)?;

    let registry = state.registry.clone();
    tokio::spawn(async move {
        let summary = registry.refresh().await;
        info!(
            available = ?summary.available,
            unavailable = ?summary.unavailable,
            "initial tool discovery complete"
        );
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
