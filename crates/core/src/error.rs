use thiserror::Error;

/// Result alias for primary provider calls.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Failure of a primary provider call.
///
/// These never leave a capability client unless the client was explicitly
/// configured to surface them (see `SttProviderConfig::allow_fallback`).
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("provider is not configured")]
    NotConfigured,

    #[error("provider returned an empty result")]
    Empty,

    #[error("provider request timed out")]
    Timeout,

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket request failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("OpenAI-compatible request failed: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("audio encoding failed: {0}")]
    Audio(#[from] hound::Error),
}
