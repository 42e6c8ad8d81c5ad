//! The vector store is an external collaborator — only the interface is
//! owned here. `BruteForceIndex` is the in-memory default
//! implementation used when no dedicated engine is configured; any HNSW- or
//! disk-backed engine is a drop-in alternative behind the same trait.

use async_trait::async_trait;

use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, id: String, embedding: Vec<f32>) -> Result<(), AppError>;
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredId>, AppError>;
}

/// Brute-force cosine-similarity search over an in-memory vector list.
/// Adequate for a curated guideline corpus (hundreds to low thousands of
/// chunks); the concrete engine is swappable behind `VectorStore`.
pub struct BruteForceIndex {
    entries: tokio::sync::RwLock<Vec<(String, Vec<f32>)>>,
}

impl BruteForceIndex {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for BruteForceIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for BruteForceIndex {
    async fn add(&self, id: String, embedding: Vec<f32>) -> Result<(), AppError> {
        self.entries.write().await.push((id, embedding));
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredId>, AppError> {
        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredId> = entries
            .iter()
            .map(|(id, vec)| ScoredId {
                id: id.clone(),
                score: cosine_similarity(embedding, vec),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}
