//! Manages the WebSocket connection lifecycle for an avatar session.

use super::{
    controller::{SessionController, SessionExit, SessionServices},
    outbound::{ClientFrame, Outbound, ServerFrame},
};
use crate::state::AppState;
use axum::{
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, instrument};
use uuid::Uuid;

const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub correlation_id: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<SessionQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let correlation_id = query
        .correlation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, correlation_id))
}

/// Main handler for an individual WebSocket connection.
///
/// Splits the socket into a writer task fed by a bounded channel and an
/// inbound stream consumed by the session controller.
#[instrument(
    name = "ws_session",
    skip_all,
    fields(session_id = %session_id, correlation_id = %correlation_id)
)]
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    correlation_id: String,
) {
    info!("New WebSocket connection");
    let (mut socket_tx, socket_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(
        async move {
            while let Some(frame) = frame_rx.recv().await {
                let (message, last) = match frame {
                    ServerFrame::Text(text) => (Message::Text(text.into()), false),
                    ServerFrame::Audio(chunk) => (Message::Binary(chunk), false),
                    ServerFrame::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };
                if let Err(e) = socket_tx.send(message).await {
                    debug!(error = %e, "Failed to write to client WebSocket");
                    break;
                }
                if last {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let inbound = socket_rx.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(ClientFrame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(data)) => Some(ClientFrame::Binary(data)),
            Ok(Message::Close(_)) => Some(ClientFrame::Close),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => {
                debug!(error = %e, "Error receiving from client WebSocket");
                Some(ClientFrame::Close)
            }
        }
    });

    let services = SessionServices {
        clients: state.registry.session_clients(),
        context: state.context_store.clone(),
        prompts: state.prompts.clone(),
        decoder: state.decoder.clone(),
    };
    let controller = SessionController::new(
        correlation_id,
        state.session_settings.clone(),
        services,
        Outbound::new(session_id, frame_tx),
    );
    let exit = controller.run(Box::pin(inbound)).await;

    match exit {
        // Nobody is reading anymore.
        SessionExit::ClientClosed => writer.abort(),
        // Let the writer deliver the final error and close frame.
        SessionExit::IdleTimeout | SessionExit::Failed => {
            let _ = writer.await;
        }
    }
    info!(?exit, "WebSocket session finished");
}
