//! Response pipeline for an accepted transcript: retrieval, generation,
//! motion dispatch, and speech.

use super::{
    cycle::{TurnContext, TurnError},
    protocol::{ServerMessage, Stopwatch},
};
use crate::{
    audio_utils::mouth_openness,
    reply::{ReplyStream, retrieve},
};
use avatar_core::{motion::MotionRequest, retrieval::context_as_text};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{Instrument, debug, warn};

pub(crate) async fn respond(context: &TurnContext, transcript: &str) -> Result<(), TurnError> {
    let clients = &context.services.clients;
    let retrieval = retrieve(
        clients,
        &context.services.context,
        transcript,
        context.settings.rag_top_k,
    )
    .await;
    let messages = context
        .services
        .prompts
        .build_messages(transcript, &context_as_text(&retrieval.chunks));

    let mut stream = ReplyStream::start(clients, messages, context.settings.max_reply_chars);
    while let Some(token) = stream.next_token().await {
        context
            .send(ServerMessage::LlmToken {
                turn_id: context.turn_id.clone(),
                token,
            })
            .await?;
    }
    let reply = stream.finish();

    context
        .send(ServerMessage::LlmDone {
            turn_id: context.turn_id.clone(),
            assistant_text: reply.text.clone(),
            fallback_used: reply.fallback_used,
            truncated: reply.truncated,
            context_count: retrieval.chunks.len(),
            retrieval: retrieval.timing,
            generation: reply.timing,
        })
        .await?;

    if reply.text.is_empty() {
        return Ok(());
    }
    dispatch_motion(context, reply.text.clone());
    synthesize(context, &reply.text).await
}

/// Generates a motion clip for the reply in the background. The result is
/// delivered whenever it is ready, independent of the audio stream.
fn dispatch_motion(context: &TurnContext, prompt: String) {
    let motion = context.services.clients.motion.clone();
    let outbound = context.outbound.clone();
    let turn_id = context.turn_id.clone();
    tokio::spawn(
        async move {
            let probe = motion.fallbacks().probe();
            let clip = motion.generate(MotionRequest::new(prompt)).await;
            let message = ServerMessage::AssistantMotion {
                turn_id,
                fallback_used: probe.used() || clip.fallback_used,
                motion: clip,
            };
            if let Err(e) = outbound.send(message).await {
                debug!(error = %e, "Motion ready after the client left");
            }
        }
        .in_current_span(),
    );
}

async fn synthesize(context: &TurnContext, reply: &str) -> Result<(), TurnError> {
    let speech = &context.services.clients.speech;
    let max_chunks = context.settings.max_tts_chunks;
    let mouth_interval = context.settings.mouth_interval;

    let stopwatch = Stopwatch::start();
    let probe = speech.fallbacks().probe();
    context
        .send(ServerMessage::TtsStart {
            turn_id: context.turn_id.clone(),
            sample_rate: speech.sample_rate(),
            channels: speech.channels(),
        })
        .await?;

    let mut audio = speech.stream_synthesize(reply, context.settings.tts_voice.as_deref());
    let mut chunks = 0usize;
    let mut truncated = false;
    let mut last_mouth: Option<Instant> = None;
    while let Some(chunk) = audio.next().await {
        if chunks >= max_chunks {
            truncated = true;
            break;
        }
        let mouth_open = mouth_openness(&chunk);
        context.outbound.send_audio(chunk).await?;
        chunks += 1;

        if last_mouth.is_none_or(|at| at.elapsed() >= mouth_interval) {
            last_mouth = Some(Instant::now());
            context
                .send(ServerMessage::AvatarEvent {
                    turn_id: context.turn_id.clone(),
                    mouth_open,
                })
                .await?;
        }
    }
    drop(audio);

    context
        .send(ServerMessage::TtsEnd {
            turn_id: context.turn_id.clone(),
            chunks,
            truncated,
            fallback_used: probe.used(),
            timing: stopwatch.finish(),
        })
        .await?;

    if truncated {
        warn!(max_chunks, "Speech exceeded the audio chunk cap, truncated");
        context
            .send_error(
                format!("speech exceeded {max_chunks} audio chunks; audio truncated"),
                false,
            )
            .await?;
    }
    Ok(())
}
