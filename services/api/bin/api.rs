//! Main Entrypoint for the Avatar API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading prompts and the retrieval index.
//! 3. Building the provider registry shared by every session.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use avatar_api::{config::Config, router::create_router, state::AppState};
use avatar_core::{prompt::PromptSet, registry::ProviderRegistry, retrieval::ContextStore};
use std::{collections::HashMap, fs, net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
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
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Prompts and Retrieval Index ---
    let prompts = if config.prompts_path.is_dir() {
        PromptSet::from_prompts(&load_prompts(&config.prompts_path)?)
    } else {
        warn!(
            path = %config.prompts_path.display(),
            "Prompts directory not found, using the built-in system prompt"
        );
        PromptSet::default()
    };

    let index_path = config.providers.rag.index_path.clone();
    let context_store = ContextStore::load(&index_path)
        .with_context(|| format!("Failed to load retrieval index {}", index_path.display()))?;
    info!(
        chunks = context_store.len(),
        path = %index_path.display(),
        "Retrieval index loaded"
    );

    // --- 4. Initialize Shared Services ---
    let registry = ProviderRegistry::from_config(config.providers.clone());
    let app_state = Arc::new(AppState::new(
        config.clone(),
        registry,
        context_store,
        prompts,
    ));
    if !app_state.decoder.supports(avatar_api::audio::AudioFormat::WebM) {
        warn!("No container decoder configured; compressed audio is sent to transcription as is");
    }

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        bind_address = %config.bind_address,
        max_buffer_fragments = config.session.max_buffer_fragments,
        idle_timeout_sec = config.session.idle_timeout.as_secs(),
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
