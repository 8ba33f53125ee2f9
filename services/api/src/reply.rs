//! Retrieval and capped generation shared by the voice session and the text
//! chat endpoint.

use crate::ws::protocol::{StepTiming, Stopwatch};
use avatar_core::{
    fallback::FallbackProbe,
    generic_types::ChatMessage,
    llm_client::TokenStream,
    prompt::ReplyLimiter,
    registry::CapabilityClients,
    retrieval::{ContextStore, RetrievedChunk},
};
use futures::StreamExt;
use tracing::{debug, info};

/// Context found for one user input.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub chunks: Vec<RetrievedChunk>,
    /// Zero when the index is empty or `top_k` is zero.
    pub timing: StepTiming,
}

pub async fn retrieve(
    clients: &CapabilityClients,
    store: &ContextStore,
    query: &str,
    top_k: usize,
) -> Retrieval {
    if store.is_empty() || top_k == 0 {
        return Retrieval {
            chunks: Vec::new(),
            timing: StepTiming::skipped(),
        };
    }
    let stopwatch = Stopwatch::start();
    let chunks = store.search(&clients.embedding, query, top_k).await;
    debug!(chunks = chunks.len(), "Retrieved context");
    Retrieval {
        chunks,
        timing: stopwatch.finish(),
    }
}

/// The finished assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub truncated: bool,
    pub fallback_used: bool,
    pub timing: StepTiming,
}

/// Generation tokens passed through the reply length cap.
pub struct ReplyStream {
    tokens: TokenStream,
    limiter: ReplyLimiter,
    probe: FallbackProbe,
    stopwatch: Stopwatch,
}

impl ReplyStream {
    pub fn start(clients: &CapabilityClients, messages: Vec<ChatMessage>, max_chars: usize) -> Self {
        Self {
            probe: clients.generation.fallbacks().probe(),
            stopwatch: Stopwatch::start(),
            tokens: clients.generation.stream_generate(messages),
            limiter: ReplyLimiter::new(max_chars),
        }
    }

    /// The next token to deliver, or `None` once the stream ended or the
    /// cap was reached.
    pub async fn next_token(&mut self) -> Option<String> {
        let token = self.tokens.next().await?;
        self.limiter.offer(&token).then_some(token)
    }

    /// Stops generation and returns what was delivered.
    pub fn finish(self) -> Reply {
        let timing = self.stopwatch.finish();
        let reply = Reply {
            text: self.limiter.text().to_string(),
            truncated: self.limiter.is_closed(),
            fallback_used: self.probe.used(),
            timing,
        };
        info!(
            chars = reply.text.chars().count(),
            truncated = reply.truncated,
            latency_ms = reply.timing.latency_ms,
            "Generated reply"
        );
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_core::{
        config::ProvidersConfig, prompt::PromptSet, registry::ProviderRegistry,
        retrieval::IndexedChunk,
    };

    fn offline_clients() -> CapabilityClients {
        ProviderRegistry::offline(ProvidersConfig::default()).session_clients()
    }

    #[tokio::test]
    async fn test_empty_index_skips_retrieval() {
        let retrieval = retrieve(&offline_clients(), &ContextStore::default(), "hi", 3).await;
        assert!(retrieval.chunks.is_empty());
        assert_eq!(retrieval.timing, StepTiming::skipped());
    }

    #[tokio::test]
    async fn test_retrieval_returns_top_k() {
        let clients = offline_clients();
        let mut chunks = Vec::new();
        for (i, text) in ["alpha", "beta", "gamma"].iter().enumerate() {
            chunks.push(IndexedChunk {
                content: text.to_string(),
                source: format!("doc{i}"),
                embedding: clients.embedding.embed_one(text).await,
            });
        }
        let store = ContextStore::new(chunks);
        let retrieval = retrieve(&clients, &store, "beta", 2).await;
        assert_eq!(retrieval.chunks.len(), 2);
        assert_eq!(retrieval.chunks[0].content, "beta");
    }

    #[tokio::test]
    async fn test_offline_reply_is_capped_and_flagged() {
        let clients = offline_clients();
        let messages = PromptSet::default().build_messages("tell me a long story", "");
        let mut stream = ReplyStream::start(&clients, messages, 150);
        let mut delivered = String::new();
        while let Some(token) = stream.next_token().await {
            delivered.push_str(&token);
        }
        let reply = stream.finish();
        assert!(reply.fallback_used);
        assert_eq!(reply.text, delivered.trim());
        assert!(reply.text.chars().count() <= 150);

        let messages = PromptSet::default().build_messages("hi", "");
        let mut stream = ReplyStream::start(&clients, messages, 5);
        while stream.next_token().await.is_some() {}
        let reply = stream.finish();
        assert!(reply.truncated);
        assert!(reply.text.chars().count() <= 5);
    }
}
