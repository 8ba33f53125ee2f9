//! Transport-neutral frames exchanged between the socket and a session.

use super::protocol::{Envelope, ServerMessage};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// A frame received from the client.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
    /// The client closed the connection.
    Close,
}

/// A frame to be written to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Text(String),
    Audio(Bytes),
    Close { code: u16, reason: String },
}

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("client connection closed")]
    Closed,
    #[error("failed to encode server message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cloneable handle for writing to one client.
#[derive(Debug, Clone)]
pub struct Outbound {
    session_id: String,
    tx: mpsc::Sender<ServerFrame>,
}

impl Outbound {
    pub fn new(session_id: impl Into<String>, tx: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            session_id: session_id.into(),
            tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Serializes `message` with the session id and queues it.
    pub async fn send(&self, message: ServerMessage) -> Result<(), OutboundError> {
        let text = serde_json::to_string(&Envelope {
            session_id: &self.session_id,
            message: &message,
        })?;
        self.push(ServerFrame::Text(text)).await
    }

    pub async fn send_audio(&self, chunk: Bytes) -> Result<(), OutboundError> {
        self.push(ServerFrame::Audio(chunk)).await
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), OutboundError> {
        self.push(ServerFrame::Close {
            code,
            reason: reason.into(),
        })
        .await
    }

    async fn push(&self, frame: ServerFrame) -> Result<(), OutboundError> {
        self.tx.send(frame).await.map_err(|_| OutboundError::Closed)
    }
}
