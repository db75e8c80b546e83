mod configuration;
mod error;
mod routes;
mod runtime;
mod state;

use configuration::Settings;
use otasuke::assembly::BedrockAgentFactory;
use otasuke::credentials::{CredentialResolver, Credentials};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::new()?;

    let store = settings.secrets.open_store()?;
    info!(
        backend = ?settings.secrets.backend,
        available = store.is_some(),
        "Secret store"
    );
    let credentials = Credentials::resolve(&CredentialResolver::with_store(store));
    info!(?credentials, "Resolved configuration");

    let state = state::AppState::new(
        Arc::new(BedrockAgentFactory::new(Arc::new(credentials))),
        &settings.sessions,
    );
    state.spawn_idle_sweeper(Duration::from_secs(settings.sessions.sweep_interval_secs.max(1)));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
