//! Prompt assembly and reply length control.

use crate::generic_types::ChatMessage;
use std::collections::HashMap;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice-enabled avatar assistant. Speak \
casually, as in natural conversation, and keep every reply under 150 characters so it can \
be read aloud in one breath. Give only the key point. Use the provided context when it is \
relevant; if there is none, answer briefly.";

/// Prompt texts keyed by file stem, e.g. `system_prompt` and `persona`.
#[derive(Debug, Clone)]
pub struct PromptSet {
    system: String,
    persona: Option<String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            persona: None,
        }
    }
}

impl PromptSet {
    pub fn new(system: impl Into<String>, persona: Option<String>) -> Self {
        Self {
            system: system.into(),
            persona,
        }
    }

    /// Picks `system_prompt` and `persona` out of a loaded prompt directory.
    /// Blank entries count as missing.
    pub fn from_prompts(prompts: &HashMap<String, String>) -> Self {
        let non_blank = |key: &str| {
            prompts
                .get(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            system: non_blank("system_prompt").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            persona: non_blank("persona"),
        }
    }

    pub fn system_prompt(&self) -> String {
        match &self.persona {
            Some(persona) => format!("{}\n\nPersona:\n{}", self.system, persona),
            None => self.system.clone(),
        }
    }

    /// System instruction, optional context block, then the user's transcript.
    pub fn build_messages(&self, transcript: &str, context: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        if !context.trim().is_empty() {
            messages.push(ChatMessage::system(format!("Context:\n{context}")));
        }
        messages.push(ChatMessage::user(transcript));
        messages
    }
}

/// Accumulates streamed tokens up to a character cap.
///
/// A token is accepted only if the trimmed text including it still fits.
/// The first rejected token closes the limiter, so the delivered text is
/// always a prefix of the stream cut at a token boundary.
#[derive(Debug)]
pub struct ReplyLimiter {
    cap: usize,
    text: String,
    closed: bool,
}

impl ReplyLimiter {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            text: String::new(),
            closed: false,
        }
    }

    /// Returns true if `token` should be delivered.
    pub fn offer(&mut self, token: &str) -> bool {
        if self.closed {
            return false;
        }
        let candidate = format!("{}{}", self.text, token);
        if candidate.trim().chars().count() > self.cap {
            self.closed = true;
            return false;
        }
        self.text = candidate;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The delivered text, trimmed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }
}
