//! One utterance-to-response cycle: final decode, transcription, and the
//! hand-off to the response pipeline.

use super::{
    controller::{SessionEvent, SessionServices},
    outbound::{Outbound, OutboundError},
    pipeline,
    protocol::{ServerMessage, Stopwatch},
};
use crate::{audio::AudioFormat, config::SessionSettings};
use avatar_core::generic_types::TranscriptionAudio;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("client connection closed")]
    Closed,
    #[error("{0}")]
    Internal(String),
}

impl From<OutboundError> for TurnError {
    fn from(e: OutboundError) -> Self {
        match e {
            OutboundError::Closed => TurnError::Closed,
            OutboundError::Encode(e) => TurnError::Internal(e.to_string()),
        }
    }
}

/// Everything a turn task needs, owned so the task can outlive the loop
/// iteration that started it.
pub(crate) struct TurnContext {
    pub turn_id: String,
    pub settings: Arc<SessionSettings>,
    pub services: SessionServices,
    pub outbound: Outbound,
    pub events: mpsc::Sender<SessionEvent>,
}

impl TurnContext {
    pub async fn send(&self, message: ServerMessage) -> Result<(), TurnError> {
        Ok(self.outbound.send(message).await?)
    }

    pub async fn send_error(
        &self,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Result<(), TurnError> {
        self.send(ServerMessage::error(Some(&self.turn_id), message, recoverable))
            .await
    }
}

/// Audio snapshot taken when the turn was finalized.
pub(crate) struct TurnInput {
    pub format: AudioFormat,
    /// The buffered audio as a decoder can read it, header included.
    pub container: Vec<u8>,
    /// Leading decoded bytes that belong to audio inside a pinned header.
    pub strip: usize,
    pub pcm: Vec<u8>,
    /// The incremental PCM may be stale; decode the whole container again.
    pub redecode: bool,
}

/// Runs the turn and always reports back to the controller.
pub(crate) async fn run_turn(context: TurnContext, input: TurnInput) {
    let result = process_turn(&context, input).await;
    if let Err(e) = &result {
        debug!(error = %e, "Turn ended early");
    }
    let _ = context
        .events
        .send(SessionEvent::TurnFinished(result))
        .await;
}

async fn process_turn(context: &TurnContext, input: TurnInput) -> Result<(), TurnError> {
    let audio = transcription_audio(context, input).await;
    let transcription = &context.services.clients.transcription;

    let stopwatch = Stopwatch::start();
    let probe = transcription.fallbacks().probe();
    let text = match transcription.transcribe(audio).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Transcription failed, dropping turn");
            return context
                .send_error(format!("transcription failed: {e}"), false)
                .await;
        }
    };
    let timing = stopwatch.finish();

    let text = text.trim().to_string();
    if text.is_empty() {
        info!("Empty transcript, nothing to answer");
        return context.send_error("no speech recognized", true).await;
    }
    info!(chars = text.chars().count(), latency_ms = timing.latency_ms, "Transcribed turn");

    context
        .send(ServerMessage::FinalTranscript {
            turn_id: context.turn_id.clone(),
            text: text.clone(),
            fallback_used: probe.used(),
            timing,
        })
        .await?;
    let _ = context.events.send(SessionEvent::Responding).await;

    pipeline::respond(context, &text).await
}

/// Picks what to send to transcription: decoded PCM when there is any,
/// otherwise the buffered container bytes.
async fn transcription_audio(context: &TurnContext, input: TurnInput) -> TranscriptionAudio {
    let TurnInput {
        format,
        container,
        strip,
        pcm,
        redecode,
    } = input;

    let pcm = if redecode {
        let rate = context.settings.target_sample_rate;
        match context.services.decoder.decode(container.clone(), format, rate).await {
            Ok(mut full) if full.len() > strip => {
                full.drain(..strip);
                full
            }
            Ok(_) => pcm,
            Err(e) if e.is_benign() => {
                debug!(error = %e, "Final decode incomplete, using incremental PCM");
                pcm
            }
            Err(e) => {
                warn!(error = %e, "Final decode failed, using incremental PCM");
                pcm
            }
        }
    } else {
        pcm
    };

    if pcm.is_empty() {
        debug!(bytes = container.len(), format = format.as_str(), "No PCM, sending raw audio");
        TranscriptionAudio::Encoded(container)
    } else {
        TranscriptionAudio::Pcm(pcm)
    }
}
