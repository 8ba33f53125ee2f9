//! Per-connection state machine.
//!
//! The controller owns the receive loop of one session. It buffers audio for
//! the turn being collected, schedules decodes and the silence timer, and
//! hands finished utterances to a turn task. Everything slow runs in spawned
//! tasks that report back through an internal event channel, so the loop is
//! always ready for the next client frame.

use super::{
    cycle::{self, TurnContext, TurnError, TurnInput},
    outbound::{ClientFrame, Outbound, OutboundError},
    protocol::{CLOSE_IDLE_TIMEOUT, CLOSE_INTERNAL_ERROR, ClientMessage, ServerMessage},
};
use crate::{
    audio::{
        AudioFormat,
        decode::{DecodeError, DecodePool},
        header::ContainerHeader,
        ingest::{DecodeWindow, IngestBuffer},
        normalizer::FormatNormalizer,
        vad::VoiceActivityDetector,
    },
    audio_utils::pcm_duration_ms,
    config::SessionSettings,
};
use avatar_core::{prompt::PromptSet, registry::CapabilityClients, retrieval::ContextStore};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep, sleep_until},
};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Assumed length of one client fragment when nothing could be decoded.
const FRAGMENT_ESTIMATE_MS: u64 = 20;
const EVENT_CAPACITY: usize = 64;

/// Shared, read-only resources a session works with.
#[derive(Clone)]
pub struct SessionServices {
    pub clients: CapabilityClients,
    pub context: Arc<ContextStore>,
    pub prompts: Arc<PromptSet>,
    pub decoder: Arc<DecodePool>,
}

/// Why a session's receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The client closed the connection or stopped reading.
    ClientClosed,
    IdleTimeout,
    Failed,
}

/// Internal events produced by tasks the controller spawned.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Decoded {
        generation: u64,
        window: DecodeWindow,
        result: Result<Vec<u8>, DecodeError>,
    },
    SilenceElapsed {
        generation: u64,
    },
    /// The turn's transcript was accepted and the reply is being produced.
    Responding,
    TurnFinished(Result<(), TurnError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Listening,
    Recognizing,
    Responding,
}

/// The utterance currently being collected.
struct CollectingTurn {
    turn_id: String,
    generation: u64,
    buffer: IngestBuffer,
    normalizer: FormatNormalizer,
    vad: VoiceActivityDetector,
    decode_in_flight: bool,
    /// New fragments arrived while a decode was running.
    dirty: bool,
}

enum SessionError {
    Closed,
    Internal(String),
}

impl From<OutboundError> for SessionError {
    fn from(e: OutboundError) -> Self {
        match e {
            OutboundError::Closed => SessionError::Closed,
            OutboundError::Encode(e) => SessionError::Internal(e.to_string()),
        }
    }
}

pub struct SessionController {
    correlation_id: String,
    settings: Arc<SessionSettings>,
    services: SessionServices,
    outbound: Outbound,
    phase: Phase,
    collecting: Option<CollectingTurn>,
    next_generation: u64,
    silence_timer: Option<JoinHandle<()>>,
    turn_task: Option<JoinHandle<()>>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl SessionController {
    pub fn new(
        correlation_id: impl Into<String>,
        settings: Arc<SessionSettings>,
        services: SessionServices,
        outbound: Outbound,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            correlation_id: correlation_id.into(),
            settings,
            services,
            outbound,
            phase: Phase::Listening,
            collecting: None,
            next_generation: 0,
            silence_timer: None,
            turn_task: None,
            events_tx,
            events_rx,
        }
    }

    /// Drives the session until the client leaves, goes idle, or the
    /// session fails.
    pub async fn run<S>(mut self, mut inbound: S) -> SessionExit
    where
        S: Stream<Item = ClientFrame> + Unpin,
    {
        let ready = ServerMessage::Ready {
            correlation_id: self.correlation_id.clone(),
        };
        if self.outbound.send(ready).await.is_err() {
            return SessionExit::ClientClosed;
        }

        let mut idle_deadline = Instant::now() + self.settings.idle_timeout;
        let exit = loop {
            let step = tokio::select! {
                frame = inbound.next() => match frame {
                    None | Some(ClientFrame::Close) => {
                        info!("Client closed the connection");
                        break SessionExit::ClientClosed;
                    }
                    Some(frame) => {
                        idle_deadline = Instant::now() + self.settings.idle_timeout;
                        self.on_frame(frame).await
                    }
                },
                Some(event) = self.events_rx.recv() => self.on_event(event).await,
                _ = sleep_until(idle_deadline) => {
                    self.on_idle().await;
                    break SessionExit::IdleTimeout;
                }
            };

            match step {
                Ok(()) => {}
                Err(SessionError::Closed) => break SessionExit::ClientClosed,
                Err(SessionError::Internal(message)) => {
                    self.on_internal_error(&message).await;
                    break SessionExit::Failed;
                }
            }
        };

        self.shutdown();
        exit
    }

    async fn on_idle(&mut self) {
        warn!(
            timeout_sec = self.settings.idle_timeout.as_secs(),
            "Session idle timeout"
        );
        let _ = self
            .outbound
            .send(ServerMessage::error(None, "idle timeout", false))
            .await;
        let _ = self.outbound.close(CLOSE_IDLE_TIMEOUT, "idle timeout").await;
    }

    async fn on_internal_error(&mut self, message: &str) {
        tracing::error!(error = %message, "Session failed");
        let _ = self
            .outbound
            .send(ServerMessage::error(None, format!("internal error: {message}"), false))
            .await;
        let _ = self.outbound.close(CLOSE_INTERNAL_ERROR, "internal error").await;
    }

    fn shutdown(&mut self) {
        self.cancel_silence_timer();
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
    }

    async fn on_frame(&mut self, frame: ClientFrame) -> Result<(), SessionError> {
        match frame {
            ClientFrame::Binary(fragment) => self.on_audio(fragment).await,
            ClientFrame::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => Ok(self.outbound.send(ServerMessage::Pong).await?),
                Ok(ClientMessage::Resume) => {
                    Ok(self.outbound.send(ServerMessage::Ack { ack: "resume" }).await?)
                }
                Ok(ClientMessage::Flush) => {
                    self.outbound.send(ServerMessage::Ack { ack: "flush" }).await?;
                    self.finalize("flush").await
                }
                Err(e) => {
                    debug!(error = %e, "Malformed control message");
                    self.send_error(None, format!("malformed control message: {e}"), true)
                        .await
                }
            },
            // Handled by the receive loop.
            ClientFrame::Close => Ok(()),
        }
    }

    async fn on_event(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::Decoded {
                generation,
                window,
                result,
            } => self.on_decoded(generation, window, result).await,
            SessionEvent::SilenceElapsed { generation } => {
                let current = self.collecting.as_ref().map(|turn| turn.generation);
                if self.phase == Phase::Listening && current == Some(generation) {
                    self.finalize("silence").await
                } else {
                    Ok(())
                }
            }
            SessionEvent::Responding => {
                self.phase = Phase::Responding;
                Ok(())
            }
            SessionEvent::TurnFinished(result) => {
                self.phase = Phase::Listening;
                self.turn_task = None;
                match result {
                    Ok(()) => Ok(()),
                    Err(TurnError::Closed) => Err(SessionError::Closed),
                    Err(TurnError::Internal(message)) => Err(SessionError::Internal(message)),
                }
            }
        }
    }

    async fn on_audio(&mut self, fragment: Bytes) -> Result<(), SessionError> {
        if self.phase != Phase::Listening {
            return self
                .send_error(
                    None,
                    "audio rejected while a response is in progress",
                    true,
                )
                .await;
        }
        if fragment.is_empty() {
            return Ok(());
        }

        let turn = match self.collecting.take() {
            Some(turn) => turn,
            None => self.start_turn(),
        };
        let turn = self.collecting.insert(turn);
        let format = turn.normalizer.observe(&fragment);
        if turn.buffer.is_empty() && turn.buffer.evictions() == 0 {
            if let Some(header) = ContainerHeader::capture(format, &fragment) {
                turn.buffer.pin_header(header);
            }
        }
        let eviction = turn.buffer.push(fragment.clone());
        let turn_id = turn.turn_id.clone();
        let generation = turn.generation;

        if let Some(eviction) = eviction {
            debug!(
                bytes = eviction.fragment.len(),
                pcm_span = eviction.pcm_span,
                "Audio backlog full, evicted oldest fragment"
            );
            self.send_error(
                Some(&turn_id),
                "audio backlog full; dropped oldest fragment",
                true,
            )
            .await?;
        }

        let mut flush_now = false;
        if format == AudioFormat::Raw {
            if let Some(turn) = self.collecting.as_mut() {
                turn.buffer.append_pcm(&fragment);
                flush_now = turn.vad.push(&fragment);
            }
            self.send_partial().await?;
        } else if self.services.decoder.supports(format) {
            self.request_decode();
        } else {
            // No decoder: the raw container goes to transcription as is.
            self.send_partial().await?;
        }

        if flush_now {
            return self.finalize("vad").await;
        }
        self.arm_silence_timer(generation);
        Ok(())
    }

    fn start_turn(&mut self) -> CollectingTurn {
        self.next_generation += 1;
        let turn_id = Uuid::new_v4().to_string();
        debug!(turn_id = %turn_id, "Collecting new turn");
        CollectingTurn {
            turn_id,
            generation: self.next_generation,
            buffer: IngestBuffer::new(self.settings.max_buffer_fragments),
            normalizer: FormatNormalizer::new(),
            vad: VoiceActivityDetector::from_settings(
                &self.settings.vad,
                self.settings.target_sample_rate,
            ),
            decode_in_flight: false,
            dirty: false,
        }
    }

    /// Starts a decode of the whole buffered container, or marks the turn
    /// dirty if one is already running.
    fn request_decode(&mut self) {
        let Some(turn) = self.collecting.as_mut() else {
            return;
        };
        if turn.decode_in_flight {
            turn.dirty = true;
            return;
        }
        let Some(format) = turn.normalizer.format() else {
            return;
        };
        turn.decode_in_flight = true;
        turn.dirty = false;

        let request = turn.buffer.decode_request();
        let generation = turn.generation;
        let pool = self.services.decoder.clone();
        let events = self.events_tx.clone();
        let rate = self.settings.target_sample_rate;
        tokio::spawn(
            async move {
                let result = pool.decode(request.bytes, format, rate).await;
                let _ = events
                    .send(SessionEvent::Decoded {
                        generation,
                        window: request.window,
                        result,
                    })
                    .await;
            }
            .in_current_span(),
        );
    }

    async fn on_decoded(
        &mut self,
        generation: u64,
        window: DecodeWindow,
        result: Result<Vec<u8>, DecodeError>,
    ) -> Result<(), SessionError> {
        let Some(turn) = self
            .collecting
            .as_mut()
            .filter(|turn| turn.generation == generation)
        else {
            return Ok(());
        };
        turn.decode_in_flight = false;

        let mut flush_now = false;
        match result {
            Ok(full) => {
                let new_pcm = turn.buffer.absorb(&window, &full);
                flush_now = turn.vad.push(&new_pcm);
            }
            Err(e) => turn.normalizer.report(&e),
        }
        let redecode = turn.dirty;

        if flush_now {
            return self.finalize("vad").await;
        }
        if redecode {
            self.request_decode();
        }
        self.send_partial().await
    }

    async fn send_partial(&mut self) -> Result<(), SessionError> {
        let Some(turn) = self.collecting.as_ref() else {
            return Ok(());
        };
        let buffered_ms = if turn.buffer.pcm().is_empty() {
            turn.buffer.len() as u64 * FRAGMENT_ESTIMATE_MS
        } else {
            pcm_duration_ms(turn.buffer.pcm().len(), self.settings.target_sample_rate)
        };
        let Some(text) = self.services.clients.transcription.build_partial(buffered_ms) else {
            return Ok(());
        };
        let message = ServerMessage::PartialTranscript {
            turn_id: turn.turn_id.clone(),
            text,
        };
        Ok(self.outbound.send(message).await?)
    }

    fn arm_silence_timer(&mut self, generation: u64) {
        self.cancel_silence_timer();
        let events = self.events_tx.clone();
        let delay = self.settings.silence_timeout;
        self.silence_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(SessionEvent::SilenceElapsed { generation }).await;
        }));
    }

    fn cancel_silence_timer(&mut self) {
        if let Some(timer) = self.silence_timer.take() {
            timer.abort();
        }
    }

    /// Closes the collecting turn and hands it to a turn task.
    async fn finalize(&mut self, trigger: &'static str) -> Result<(), SessionError> {
        self.cancel_silence_timer();
        if self.phase != Phase::Listening {
            return self
                .send_error(None, "a turn is already being processed", true)
                .await;
        }
        let Some(mut turn) = self.collecting.take() else {
            return self.send_error(None, "no buffered audio to flush", true).await;
        };
        if turn.buffer.is_empty() {
            return self
                .send_error(Some(&turn.turn_id), "no buffered audio to flush", true)
                .await;
        }

        let format = turn.normalizer.format().unwrap_or(AudioFormat::Raw);
        let redecode = format.needs_decode()
            && self.services.decoder.supports(format)
            && (turn.decode_in_flight || turn.dirty || turn.buffer.has_undecoded());
        let evicted = turn.buffer.evictions();
        let container = turn.buffer.decode_request();
        let (fragments, pcm) = turn.buffer.drain();
        info!(
            turn_id = %turn.turn_id,
            trigger,
            fragments = fragments.len(),
            pcm_bytes = pcm.len(),
            evicted,
            format = format.as_str(),
            "Finalizing turn"
        );

        self.phase = Phase::Recognizing;
        let context = TurnContext {
            turn_id: turn.turn_id.clone(),
            settings: self.settings.clone(),
            services: self.services.clone(),
            outbound: self.outbound.clone(),
            events: self.events_tx.clone(),
        };
        let input = TurnInput {
            format,
            container: container.bytes,
            strip: container.window.strip(),
            pcm,
            redecode,
        };
        let span = info_span!("turn", turn_id = %turn.turn_id);
        self.turn_task = Some(tokio::spawn(cycle::run_turn(context, input).instrument(span)));
        Ok(())
    }

    async fn send_error(
        &self,
        turn_id: Option<&str>,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Result<(), SessionError> {
        let message = ServerMessage::error(turn_id, message, recoverable);
        Ok(self.outbound.send(message).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_run_future_is_send() {
        // Compile-time only: axum's upgrade callback needs a Send future.
        let _check = |controller: SessionController| {
            let run = controller.run(futures::stream::empty::<ClientFrame>());
            assert_send(&run);
        };
    }
}
