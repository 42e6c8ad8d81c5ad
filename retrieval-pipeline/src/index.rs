//! Builds the RAG index once at startup from a directory of guideline
//! files with YAML front matter, chunking with `text-splitter` and
//! content-addressing the directory with a `sha2` fingerprint so
//! rebuilds are skipped when nothing changed.

use std::path::Path;

use common::clinical::GuidelineChunk;
use common::embedding::EmbeddingProvider;
use common::error::AppError;
use common::vector_store::VectorStore;
use sha2::{Digest, Sha256};
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::RetrievalTuning;

#[derive(Debug, serde::Deserialize)]
struct FrontMatter {
    title: String,
    organization: String,
    #[serde(default)]
    year: Option<u16>,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
}

/// A built RAG index: the chunk metadata (for sanitization, diversity
/// bucketing) and the vector store holding their embeddings. Held behind
/// `Arc` by callers so it can be shared across requests without rebuilding.
pub struct RagIndex {
    pub chunks: Vec<GuidelineChunk>,
    pub fingerprint: String,
}

impl RagIndex {
    /// Computes a `sha2` fingerprint of a directory's file contents, used to
    /// decide whether a cached build can be reused. Order-independent: file
    /// paths are sorted before hashing so unrelated filesystem iteration
    /// order doesn't spuriously invalidate the cache.
    pub fn fingerprint_dir(dir: &Path) -> Result<String, AppError> {
        let mut paths: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect();
        paths.sort();

        let mut hasher = Sha256::new();
        for path in paths {
            let bytes = std::fs::read(&path)?;
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update(&bytes);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Builds the index by reading every guideline file under `dir`,
    /// splitting front matter from body, chunking the body, and embedding
    /// each chunk into `store`.
    pub async fn build_from_dir(
        dir: &Path,
        tuning: &RetrievalTuning,
        embedder: &dyn EmbeddingProvider,
        store: &dyn VectorStore,
    ) -> Result<Self, AppError> {
        let fingerprint = Self::fingerprint_dir(dir)?;
        let mut chunks = Vec::new();

        let capacity = ChunkCapacity::new(tuning.chunk_window_chars.saturating_sub(tuning.chunk_overlap_chars))
            .with_max(tuning.chunk_window_chars)
            .map_err(|err| AppError::Internal(format!("invalid chunk capacity: {err}")))?;
        let chunk_config = ChunkConfig::new(capacity)
            .with_overlap(tuning.chunk_overlap_chars)
            .map_err(|err| AppError::Internal(format!("invalid chunk overlap: {err}")))?;
        let splitter = TextSplitter::new(chunk_config);

        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !matches!(ext, "md" | "markdown" | "txt") {
                continue;
            }

            let raw = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable guideline file");
                    continue;
                }
            };

            let (front_matter, body) = split_front_matter(&raw);
            let meta: FrontMatter = match serde_yaml::from_str(front_matter) {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping guideline file with invalid front matter");
                    continue;
                }
            };

            let doc_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| meta.title.clone());

            for (index, chunk_text) in splitter.chunks(body).enumerate() {
                let embedding = embedder.embed(chunk_text).await?;
                let chunk = GuidelineChunk {
                    doc_id: doc_id.clone(),
                    title: meta.title.clone(),
                    organization: meta.organization.clone(),
                    year: meta.year,
                    topic: meta.topic.clone(),
                    categories: meta.categories.clone(),
                    license: meta.license.clone(),
                    source_url: meta.source_url.clone(),
                    chunk_text: chunk_text.to_string(),
                    chunk_index: index as u32,
                };
                let chunk_id = format!("{doc_id}#{index}");
                store.add(chunk_id, embedding).await?;
                chunks.push(chunk);
            }
        }

        info!(count = chunks.len(), %fingerprint, "built RAG index");
        Ok(Self { chunks, fingerprint })
    }
}

/// Splits `---\n<yaml>\n---\n<body>` front matter from the rest of the
/// document. Files without a leading `---` fence get an empty front-matter
/// block (which fails `FrontMatter` deserialization and is skipped).
fn split_front_matter(raw: &str) -> (&str, &str) {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("---") {
        return ("", raw);
    }
    let after_first = &trimmed[3..];
    let Some(end) = after_first.find("---") else {
        return ("", raw);
    };
    let front = &after_first[..end];
    let body = &after_first[end + 3..];
    (front, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_front_matter_and_body() {
        let raw = "---\ntitle: Sepsis Guideline\norganization: WHO\n---\nBody text here.";
        let (front, body) = split_front_matter(raw);
        assert!(front.contains("title: Sepsis Guideline"));
        assert_eq!(body.trim(), "Body text here.");
    }

    #[test]
    fn missing_front_matter_yields_empty_front() {
        let raw = "Just a plain document with no front matter.";
        let (front, body) = split_front_matter(raw);
        assert!(front.is_empty());
        assert_eq!(body, raw);
    }
}
