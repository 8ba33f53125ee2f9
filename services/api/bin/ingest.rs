//! Builds the retrieval index from text files.
//!
//! Usage: `ingest <file-or-directory>...`
//!
//! Every `.txt` and `.md` file is split into overlapping chunks, embedded
//! through the configured embedding provider (or its offline substitute),
//! and written to `RAG_INDEX_PATH`.

use anyhow::{Context, bail};
use avatar_api::config::Config;
use avatar_core::{
    registry::ProviderRegistry,
    retrieval::{ContextStore, IndexedChunk, chunk_text},
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

const CHUNK_SIZE: usize = 800;
const CHUNK_OVERLAP: usize = 100;
const EMBED_BATCH: usize = 32;

fn is_text_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("txt") | Some("md")
    )
}

fn collect_files(root: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if root.is_file() {
        files.push(root.to_path_buf());
        return Ok(());
    }
    let mut entries = fs::read_dir(root)
        .with_context(|| format!("Could not read {}", root.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.path());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if is_text_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let roots: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if roots.is_empty() {
        bail!("usage: ingest <file-or-directory>...");
    }
    let mut files = Vec::new();
    for root in &roots {
        collect_files(root, &mut files)?;
    }

    let mut texts = Vec::new();
    let mut sources = Vec::new();
    for file in &files {
        let content = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };
        let source = file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        for chunk in chunk_text(&content, CHUNK_SIZE, CHUNK_OVERLAP) {
            texts.push(chunk);
            sources.push(source.clone());
        }
    }
    info!(files = files.len(), chunks = texts.len(), "Chunked input files");

    let registry = ProviderRegistry::from_config(config.providers.clone());
    let embeddings = registry.session_clients().embedding;
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH) {
        vectors.extend(embeddings.embed(batch).await);
    }
    let fallbacks = embeddings.fallbacks().get();
    if fallbacks > 0 {
        warn!(
            batches = fallbacks,
            "Some chunks were embedded with the offline substitute"
        );
    }

    let chunks: Vec<IndexedChunk> = texts
        .into_iter()
        .zip(sources)
        .zip(vectors)
        .map(|((content, source), embedding)| IndexedChunk {
            content,
            source,
            embedding,
        })
        .collect();
    let store = ContextStore::new(chunks);
    let index_path = &config.providers.rag.index_path;
    if let Some(parent) = index_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    store.save(index_path)?;
    info!(chunks = store.len(), path = %index_path.display(), "Wrote retrieval index");
    Ok(())
}
