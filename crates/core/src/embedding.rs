//! Text embeddings for retrieval.

use crate::{
    error::{CapabilityError, CapabilityResult},
    fallback::FallbackCounter,
};
use async_openai::{Client, config::OpenAIConfig, types::CreateEmbeddingRequestArgs};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Length of a fallback vector.
pub const FALLBACK_DIMENSIONS: usize = 32;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, texts: &[String]) -> CapabilityResult<Vec<Vec<f32>>>;
}

/// Embeddings from any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbeddings {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIEmbeddings {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIEmbeddings {
    async fn embed(&self, texts: &[String]) -> CapabilityResult<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(texts.to_vec())
            .build()?;
        let mut response = self.client.embeddings().create(request).await?;
        response.data.sort_by_key(|item| item.index);
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Option<Arc<dyn EmbeddingBackend>>,
    fallbacks: FallbackCounter,
}

impl EmbeddingClient {
    pub fn new(backend: Option<Arc<dyn EmbeddingBackend>>, fallbacks: FallbackCounter) -> Self {
        Self { backend, fallbacks }
    }

    pub fn fallbacks(&self) -> &FallbackCounter {
        &self.fallbacks
    }

    /// One vector per input text. Never fails.
    ///
    /// A provider answer with the wrong number of vectors is treated like a
    /// failure and the whole batch is hashed instead.
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let failure = match &self.backend {
            None => CapabilityError::NotConfigured,
            Some(backend) => match backend.embed(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => return vectors,
                Ok(vectors) if vectors.is_empty() => CapabilityError::Empty,
                Ok(vectors) => CapabilityError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    vectors.len()
                )),
                Err(e) => e,
            },
        };
        self.fallbacks.record(&failure);
        texts.iter().map(|text| fallback_embedding(text)).collect()
    }

    pub async fn embed_one(&self, text: &str) -> Vec<f32> {
        self.embed(&[text.to_string()])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| fallback_embedding(text))
    }
}

/// Deterministic stand-in vector derived from the SHA-256 of `text`.
pub fn fallback_embedding(text: &str) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .take(FALLBACK_DIMENSIONS)
        .map(|byte| *byte as f32 / 255.0)
        .collect()
}
