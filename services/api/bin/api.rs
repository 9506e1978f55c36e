//! Main Entrypoint for the Chorus API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the orchestrator with the OpenAI collaborators.
//! 3. Registering the built-in capability providers.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use chorus_api::{
    config::Config,
    providers::{openai::OpenAiCollaborators, playback},
    router::create_router,
    state::AppState,
};
use chorus_core::Orchestrator;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing orchestrator...");

    // --- 3. Build the Orchestrator ---
    let collaborators = OpenAiCollaborators::new(&config).into_collaborators();
    let orchestrator = Orchestrator::new(config.orchestrator(), collaborators);
    playback::register(&orchestrator);
    let maintenance = orchestrator.spawn_maintenance();

    let app_state = Arc::new(AppState {
        orchestrator,
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        chat_model = %config.chat_model,
        transcription_model = %config.transcription_model,
        sample_rate = config.sample_rate,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for handle in maintenance {
        handle.abort();
    }
    info!("Server has shut down.");
    Ok(())
}
