//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ErrorResponse, FallbackTotalsDto, HealthResponse, MotionGeneratePayload,
        MotionGenerateResponse, ProviderStatusDto, ProvidersResponse, TextChatContext,
        TextChatDone, TextChatLatency, TextChatPayload, TextChatToken,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::diagnostics_providers,
        handlers::generate_motion,
        handlers::text_chat,
    ),
    components(
        schemas(HealthResponse, ProvidersResponse, ProviderStatusDto, FallbackTotalsDto, MotionGeneratePayload, MotionGenerateResponse, TextChatPayload, TextChatContext, TextChatToken, TextChatLatency, TextChatDone, ErrorResponse)
    ),
    tags(
        (name = "Avatar API", description = "Diagnostics, motion generation and text chat for the voice avatar backend")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/diagnostics/providers",
            get(handlers::diagnostics_providers),
        )
        .route("/motion/generate", post(handlers::generate_motion))
        .route("/text-chat", post(handlers::text_chat))
        .route("/ws/session/{session_id}", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
