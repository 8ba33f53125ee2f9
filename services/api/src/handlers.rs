//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests: health,
//! provider diagnostics, direct motion generation and streamed text chat.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
    },
};
use avatar_core::{
    motion::{MAX_DURATION_SEC, MAX_FPS, MIN_DURATION_SEC, MotionRequest},
    retrieval::context_as_text,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::{
    models::{
        ErrorResponse, HealthResponse, MotionGeneratePayload, MotionGenerateResponse,
        ProvidersResponse, TextChatContext, TextChatDone, TextChatLatency, TextChatPayload,
        TextChatToken,
    },
    reply::{ReplyStream, retrieve},
    state::AppState,
};

const MAX_TEXT_CHAT_TOP_K: usize = 50;
const TEXT_CHAT_EVENT_BUFFER: usize = 64;

pub enum ApiError {
    BadRequest(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Which capability providers are configured, and how often each fell back.
#[utoipa::path(
    get,
    path = "/diagnostics/providers",
    responses(
        (status = 200, description = "Provider configuration and fallback totals", body = ProvidersResponse)
    )
)]
pub async fn diagnostics_providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse::new(
        state.registry.summary(),
        state.registry.fallback_totals(),
        state.context_store.len(),
    ))
}

/// Generate a motion clip for a text prompt.
///
/// Uses the configured motion provider, or the offline generator when it is
/// unavailable; `fallback_used` tells which.
#[utoipa::path(
    post,
    path = "/motion/generate",
    request_body = MotionGeneratePayload,
    responses(
        (status = 200, description = "Generated motion clip", body = MotionGenerateResponse),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn generate_motion(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MotionGeneratePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    if payload
        .duration_sec
        .is_some_and(|d| !(MIN_DURATION_SEC..=MAX_DURATION_SEC).contains(&d))
    {
        return Err(ApiError::BadRequest(format!(
            "duration_sec must be between {MIN_DURATION_SEC} and {MAX_DURATION_SEC}"
        )));
    }
    if payload.fps.is_some_and(|fps| !(1..=MAX_FPS).contains(&fps)) {
        return Err(ApiError::BadRequest(format!(
            "fps must be between 1 and {MAX_FPS}"
        )));
    }

    let request = MotionRequest {
        prompt: prompt.to_string(),
        seed: payload.seed,
        duration_sec: payload.duration_sec,
        fps: payload.fps,
    };
    let clip = state.registry.session_clients().motion.generate(request).await;
    info!(
        job_id = %clip.job_id,
        fallback_used = clip.fallback_used,
        "Generated motion clip"
    );
    Ok((StatusCode::OK, Json(MotionGenerateResponse::from(clip))))
}

/// Answer a typed message with retrieval and capped generation, streamed as
/// server-sent events.
///
/// Emits one `context` event, a `token` event per delivered token, and a
/// closing `done` event carrying the full reply.
#[utoipa::path(
    post,
    path = "/text-chat",
    request_body = TextChatPayload,
    responses(
        (status = 200, description = "Stream of `context`, `token` and `done` events", content_type = "text/event-stream", body = String),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn text_chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TextChatPayload>,
) -> Result<Sse<KeepAliveStream<ReceiverStream<Result<Event, axum::Error>>>>, ApiError> {
    let user_text = payload.user_text.trim().to_string();
    if user_text.is_empty() {
        return Err(ApiError::BadRequest("user_text must not be empty".to_string()));
    }
    let top_k = payload.top_k.unwrap_or(state.session_settings.rag_top_k);
    if top_k > MAX_TEXT_CHAT_TOP_K {
        return Err(ApiError::BadRequest(format!(
            "top_k must be at most {MAX_TEXT_CHAT_TOP_K}"
        )));
    }
    let chat = TextChat {
        session_id: payload.session_id,
        turn_id: payload
            .turn_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_text,
        top_k,
    };

    let (events, rx) = mpsc::channel(TEXT_CHAT_EVENT_BUFFER);
    let span = info_span!("text_chat", session_id = %chat.session_id, turn_id = %chat.turn_id);
    tokio::spawn(chat.stream(state, events).instrument(span));
    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

struct TextChat {
    session_id: String,
    turn_id: String,
    user_text: String,
    top_k: usize,
}

impl TextChat {
    async fn stream(self, state: Arc<AppState>, events: mpsc::Sender<Result<Event, axum::Error>>) {
        let clients = state.registry.session_clients();
        let retrieval = retrieve(&clients, &state.context_store, &self.user_text, self.top_k).await;
        let context = TextChatContext {
            session_id: self.session_id.clone(),
            turn_id: self.turn_id.clone(),
            document_count: retrieval.chunks.len(),
        };
        if !send_event(&events, "context", &context).await {
            return;
        }

        let messages = state
            .prompts
            .build_messages(&self.user_text, &context_as_text(&retrieval.chunks));
        let mut reply = ReplyStream::start(&clients, messages, state.session_settings.max_reply_chars);
        while let Some(token) = reply.next_token().await {
            let token = TextChatToken {
                session_id: self.session_id.clone(),
                turn_id: self.turn_id.clone(),
                token,
            };
            if !send_event(&events, "token", &token).await {
                return;
            }
        }
        let reply = reply.finish();

        let done = TextChatDone {
            session_id: self.session_id,
            turn_id: self.turn_id,
            assistant_text: reply.text,
            used_context: !retrieval.chunks.is_empty(),
            truncated: reply.truncated,
            fallback_used: reply.fallback_used,
            latency_ms: TextChatLatency {
                rag: retrieval.timing.latency_ms,
                llm: reply.timing.latency_ms,
            },
        };
        if send_event(&events, "done", &done).await {
            info!(used_context = done.used_context, "Text chat completed");
        }
    }
}

/// Returns false once the client has gone away.
async fn send_event<T: Serialize>(
    events: &mpsc::Sender<Result<Event, axum::Error>>,
    name: &str,
    data: &T,
) -> bool {
    let event = Event::default().event(name).json_data(data);
    if events.send(event).await.is_err() {
        debug!(event = name, "Text chat client disconnected");
        return false;
    }
    true
}
