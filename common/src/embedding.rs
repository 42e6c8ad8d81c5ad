//! Sentence-embedding client abstraction.
//!
//! A small trait-backed service object rather than module-level model
//! globals: constructed once at startup, injected through request
//! state, fakeable in tests.

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;

use crate::error::AppError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible remote embedding client.
pub struct OpenAiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: u32,
}

impl OpenAiEmbeddingProvider {
    pub fn new(base_url: &str, api_key: &str, model: String, dimension: u32) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model,
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimension)
            .input([input])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .first()
            .ok_or_else(|| AppError::ParseFailure("no embedding data received".to_string()))?
            .embedding
            .clone();

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension as usize
    }
}

/// Deterministic hashed embedding, used for tests and for any environment
/// without a configured remote embedding endpoint. Produces a stable
/// pseudo-embedding for a given string, good enough for nearest-neighbor
/// unit tests but not for production retrieval quality.
pub struct HashedEmbeddingProvider {
    dimension: usize,
}

impl HashedEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbeddingProvider {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in input.bytes().enumerate() {
            let idx = i % self.dimension;
            vector[idx] += f32::from(byte) / 255.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_embedding_is_deterministic() {
        let provider = HashedEmbeddingProvider::new(32);
        let a = provider.embed("pigmented lesion").await.unwrap();
        let b = provider.embed("pigmented lesion").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn hashed_embedding_differs_for_different_input() {
        let provider = HashedEmbeddingProvider::new(32);
        let a = provider.embed("melanoma").await.unwrap();
        let b = provider.embed("pericarditis").await.unwrap();
        assert_ne!(a, b);
    }
}
