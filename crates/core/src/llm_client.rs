use crate::{
    config::LlmProviderConfig,
    error::{CapabilityError, CapabilityResult},
    fallback::FallbackCounter,
    generic_types::{ChatMessage, ChatRole},
};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::{pin::Pin, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A stream of text chunks from a primary LLM provider.
pub type LLMStream = Pin<Box<dyn Stream<Item = CapabilityResult<String>> + Send>>;

/// A stream of tokens that never fails.
pub type TokenStream = Pin<Box<dyn Stream<Item = String> + Send>>;

const FALLBACK_NOTICE: &str = "The language model is unreachable, so this is a canned reply.";

/// A generic client for interacting with an LLM.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Starts a streaming chat completion.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> CapabilityResult<LLMStream>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `provider` - Model identifier and sampling parameters.
    pub fn new(config: OpenAIConfig, provider: &LlmProviderConfig) -> Self {
        Self {
            client: Client::with_config(config),
            model: provider.model.clone(),
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
        }
    }
}

fn to_request_message(message: ChatMessage) -> CapabilityResult<ChatCompletionRequestMessage> {
    let built = match message.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
    };
    Ok(built)
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> CapabilityResult<LLMStream> {
        let messages = messages
            .into_iter()
            .map(to_request_message)
            .collect::<CapabilityResult<Vec<_>>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async {
            match result {
                Ok(response) => {
                    let content = response.choices.first()?.delta.content.clone()?;
                    if content.is_empty() {
                        None
                    } else {
                        Some(Ok(content))
                    }
                }
                Err(e) => Some(Err(CapabilityError::from(e))),
            }
        })))
    }
}

/// Streamed generation with a deterministic offline reply.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Option<Arc<dyn LLMClient>>,
    fallbacks: FallbackCounter,
}

impl GenerationClient {
    pub fn new(backend: Option<Arc<dyn LLMClient>>, fallbacks: FallbackCounter) -> Self {
        Self { backend, fallbacks }
    }

    pub fn fallbacks(&self) -> &FallbackCounter {
        &self.fallbacks
    }

    /// Streams reply tokens in emission order.
    ///
    /// Provider failures (before or during the stream) and empty provider
    /// streams are followed by the fallback tokens. Dropping the returned
    /// stream stops the underlying request.
    pub fn stream_generate(&self, messages: Vec<ChatMessage>) -> TokenStream {
        let (tx, rx) = mpsc::channel(32);
        if messages.is_empty() {
            return Box::pin(ReceiverStream::new(rx));
        }
        let backend = self.backend.clone();
        let fallbacks = self.fallbacks.clone();

        tokio::spawn(async move {
            let failure = match backend {
                None => CapabilityError::NotConfigured,
                Some(backend) => match backend.stream_chat(messages.clone()).await {
                    Err(e) => e,
                    Ok(mut stream) => {
                        let mut emitted = 0usize;
                        let mut failure = None;
                        while let Some(item) = stream.next().await {
                            match item {
                                Ok(token) if token.is_empty() => {}
                                Ok(token) => {
                                    emitted += 1;
                                    if tx.send(token).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        match failure {
                            Some(e) => e,
                            None if emitted == 0 => CapabilityError::Empty,
                            None => return,
                        }
                    }
                },
            };

            fallbacks.record(&failure);
            for token in fallback_tokens(&messages) {
                if tx.send(token).await.is_err() {
                    return;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// The offline reply: a fixed notice followed by an echo of the last user message.
pub fn fallback_tokens(messages: &[ChatMessage]) -> Vec<String> {
    let mut tokens = vec![FALLBACK_NOTICE.to_string()];
    let user_text = messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.trim())
        .unwrap_or_default();
    if !user_text.is_empty() {
        tokens.push(format!(" User said: {user_text}"));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::Capability;
    use futures::stream;

    struct ScriptedLlm {
        items: Vec<Result<&'static str, &'static str>>,
    }

    #[async_trait]
    impl LLMClient for ScriptedLlm {
        async fn stream_chat(&self, _messages: Vec<ChatMessage>) -> CapabilityResult<LLMStream> {
            let items: Vec<CapabilityResult<String>> = self
                .items
                .iter()
                .map(|item| match item {
                    Ok(token) => Ok(token.to_string()),
                    Err(msg) => Err(CapabilityError::InvalidResponse(msg.to_string())),
                })
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn client(backend: Option<Arc<dyn LLMClient>>) -> GenerationClient {
        GenerationClient::new(backend, FallbackCounter::new(Capability::Generation))
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![ChatMessage::system("be brief"), ChatMessage::user("what time is it")]
    }

    #[tokio::test]
    async fn test_primary_tokens_stream_in_order() {
        let client = client(Some(Arc::new(ScriptedLlm {
            items: vec![Ok("It "), Ok(""), Ok("is "), Ok("noon.")],
        })));
        let probe = client.fallbacks().probe();
        let tokens: Vec<String> = client.stream_generate(conversation()).collect().await;
        assert_eq!(tokens, vec!["It ", "is ", "noon."]);
        assert!(!probe.used());
    }

    #[tokio::test]
    async fn test_unconfigured_backend_uses_fallback() {
        let client = client(None);
        let probe = client.fallbacks().probe();
        let tokens: Vec<String> = client.stream_generate(conversation()).collect().await;
        assert_eq!(
            tokens,
            vec![
                FALLBACK_NOTICE.to_string(),
                " User said: what time is it".to_string()
            ]
        );
        assert!(probe.used());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_appends_fallback() {
        let client = client(Some(Arc::new(ScriptedLlm {
            items: vec![Ok("Partial"), Err("connection reset")],
        })));
        let tokens: Vec<String> = client.stream_generate(conversation()).collect().await;
        assert_eq!(tokens[0], "Partial");
        assert_eq!(tokens[1], FALLBACK_NOTICE);
        assert_eq!(client.fallbacks().get(), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_counts_as_fallback() {
        let client = client(Some(Arc::new(ScriptedLlm { items: vec![] })));
        let tokens: Vec<String> = client.stream_generate(conversation()).collect().await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(client.fallbacks().get(), 1);
    }

    #[tokio::test]
    async fn test_no_messages_yields_nothing() {
        let client = client(None);
        let tokens: Vec<String> = client.stream_generate(Vec::new()).collect().await;
        assert!(tokens.is_empty());
        assert_eq!(client.fallbacks().get(), 0);
    }

    #[test]
    fn test_fallback_tokens_are_deterministic() {
        assert_eq!(fallback_tokens(&conversation()), fallback_tokens(&conversation()));
        assert_eq!(fallback_tokens(&[ChatMessage::system("x")]).len(), 1);
    }
}
