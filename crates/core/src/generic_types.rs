use serde::{Deserialize, Serialize};

/// The author of a chat message sent to a generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A provider-agnostic chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Audio handed to a transcription provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionAudio {
    /// Mono 16-bit little-endian PCM at the configured target rate.
    Pcm(Vec<u8>),
    /// Container bytes exactly as received from the client (e.g. WebM/Opus).
    Encoded(Vec<u8>),
}

impl TranscriptionAudio {
    pub fn len(&self) -> usize {
        match self {
            TranscriptionAudio::Pcm(bytes) | TranscriptionAudio::Encoded(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
