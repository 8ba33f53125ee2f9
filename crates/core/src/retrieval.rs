//! Context retrieval over a flat vector index.
//!
//! The index is a JSON array of `{content, source, embedding}` records built
//! by the `ingest` binary. Search is brute-force cosine similarity, which is
//! plenty for the few thousand chunks a persona knowledge base holds.

use crate::embedding::EmbeddingClient;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read or write index {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("index {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub content: String,
    #[serde(default = "unknown_source")]
    pub source: String,
    pub embedding: Vec<f32>,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    chunks: Vec<IndexedChunk>,
}

impl ContextStore {
    pub fn new(chunks: Vec<IndexedChunk>) -> Self {
        Self { chunks }
    }

    /// Loads the index at `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Retrieval index not found. Context retrieval disabled.");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(IndexError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let chunks: Vec<IndexedChunk> =
            serde_json::from_str(&raw).map_err(|source| IndexError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), chunks = chunks.len(), "Loaded retrieval index");
        Ok(Self { chunks })
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let io_err = |source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_string(&self.chunks).map_err(|source| IndexError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, body).map_err(io_err)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The `top_k` chunks most similar to `query`, best first.
    ///
    /// Chunks whose dimension differs from the query vector are skipped.
    pub async fn search(
        &self,
        embeddings: &EmbeddingClient,
        query: &str,
        top_k: usize,
    ) -> Vec<RetrievedChunk> {
        if query.trim().is_empty() || self.chunks.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let query_vector = embeddings.embed_one(query).await;
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .filter(|chunk| chunk.embedding.len() == query_vector.len())
            .map(|chunk| (cosine_similarity(&query_vector, &chunk.embedding), chunk))
            .collect();
        if scored.len() < self.chunks.len() {
            debug!(
                skipped = self.chunks.len() - scored.len(),
                dimensions = query_vector.len(),
                "Skipped index entries with a different embedding dimension"
            );
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(score, chunk)| RetrievedChunk {
                content: chunk.content.clone(),
                source: chunk.source.clone(),
                score,
            })
            .collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Numbered context block for the prompt, one paragraph per chunk.
pub fn context_as_text(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] ({}) {}", i + 1, chunk.source, chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Splits `text` into overlapping windows of at most `size` characters.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk.trim().to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::fallback_embedding,
        fallback::{Capability, FallbackCounter},
    };
    use approx::assert_relative_eq;

    fn offline_embeddings() -> EmbeddingClient {
        EmbeddingClient::new(None, FallbackCounter::new(Capability::Embedding))
    }

    fn chunk(content: &str, source: &str) -> IndexedChunk {
        IndexedChunk {
            content: content.to_string(),
            source: source.to_string(),
            embedding: fallback_embedding(content),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_relative_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let store = ContextStore::new(vec![
            chunk("the sky is blue", "sky.txt"),
            chunk("grass is green", "grass.txt"),
            IndexedChunk {
                content: "wrong size".into(),
                source: "x".into(),
                embedding: vec![1.0, 2.0],
            },
        ]);
        let embeddings = offline_embeddings();
        let results = store.search(&embeddings, "grass is green", 5).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "grass.txt");
        assert_relative_eq!(results[0].score, 1.0, epsilon = 1e-5);
    }

    #[tokio::test]
    async fn test_empty_store_or_query_skips_embedding() {
        let embeddings = offline_embeddings();
        assert!(ContextStore::default().search(&embeddings, "q", 3).await.is_empty());
        let store = ContextStore::new(vec![chunk("a", "a")]);
        assert!(store.search(&embeddings, "  ", 3).await.is_empty());
        assert_eq!(embeddings.fallbacks().get(), 0);
    }

    #[test]
    fn test_context_text_format() {
        let text = context_as_text(&[
            RetrievedChunk {
                content: "one".into(),
                source: "a.md".into(),
                score: 0.9,
            },
            RetrievedChunk {
                content: "two".into(),
                source: "b.md".into(),
                score: 0.5,
            },
        ]);
        assert_eq!(text, "[1] (a.md) one\n\n[2] (b.md) two");
    }

    #[test]
    fn test_missing_index_is_empty() {
        let store = ContextStore::load(Path::new("/definitely/not/here/index.json"));
        assert!(matches!(store, Ok(s) if s.is_empty()));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("avatar-index-{}.json", uuid::Uuid::new_v4()));
        let store = ContextStore::new(vec![chunk("hello", "h.txt")]);
        assert!(store.save(&path).is_ok());
        let loaded = ContextStore::load(&path).map(|s| s.len()).unwrap_or_default();
        assert_eq!(loaded, 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_chunk_text_overlaps() {
        let chunks = chunk_text("abcdefghij", 4, 1);
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
        assert!(chunk_text("   ", 4, 1).is_empty());
    }
}
