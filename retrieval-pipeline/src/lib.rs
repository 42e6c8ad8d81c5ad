//! RAG retriever: an eight-stage pipeline over a curated, content-addressed
//! guideline index. See `pipeline` for the stage-by-stage contract and
//! `index` for how the corpus is built and fingerprinted at startup.

pub mod cache;
pub mod config;
pub mod index;
pub mod pipeline;
pub mod sanitize;

pub use cache::QueryCache;
pub use config::RetrievalTuning;
pub use index::RagIndex;
pub use pipeline::{retrieve, RetrieveOutput};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::clinical::GuidelineChunk;
    use common::embedding::{EmbeddingProvider, HashedEmbeddingProvider};
    use common::vector_store::BruteForceIndex;

    use super::*;

    fn sample_chunks() -> Vec<GuidelineChunk> {
        vec![
            GuidelineChunk {
                doc_id: "sepsis-2021".to_string(),
                title: "Sepsis Management".to_string(),
                organization: "WHO".to_string(),
                year: Some(2021),
                topic: "sepsis".to_string(),
                categories: vec!["infectious-disease".to_string()],
                license: None,
                source_url: Some("https://who.int/sepsis".to_string()),
                chunk_text: "Early broad-spectrum antibiotics within one hour.".to_string(),
                chunk_index: 0,
            },
            GuidelineChunk {
                doc_id: "sepsis-2021".to_string(),
                title: "Sepsis Management".to_string(),
                organization: "WHO".to_string(),
                year: Some(2021),
                topic: "sepsis".to_string(),
                categories: vec!["infectious-disease".to_string()],
                license: None,
                source_url: Some("https://who.int/sepsis".to_string()),
                chunk_text: "Fluid resuscitation with 30mL/kg crystalloid.".to_string(),
                chunk_index: 1,
            },
        ]
    }

    async fn build_fixture() -> (HashedEmbeddingProvider, BruteForceIndex, QueryCache, Vec<GuidelineChunk>) {
        let embedder = HashedEmbeddingProvider::new(16);
        let store = BruteForceIndex::new();
        let chunks = sample_chunks();
        for chunk in &chunks {
            let embedding = embedder.embed(&chunk.chunk_text).await.expect("embed fixture chunk");
            let id = format!("{}#{}", chunk.doc_id, chunk.chunk_index);
            store.add(id, embedding).await.expect("add fixture embedding");
        }
        let cache = QueryCache::new(Duration::from_secs(900), 256);
        (embedder, store, cache, chunks)
    }

    #[tokio::test]
    async fn retrieve_returns_sanitized_chunks_within_top_k() {
        let (embedder, store, cache, chunks) = build_fixture().await;
        let tuning = RetrievalTuning {
            similarity_threshold: -1.0,
            ..RetrievalTuning::default()
        };

        let output = retrieve(
            "sepsis antibiotics timing".to_string(),
            2,
            vec![],
            &tuning,
            &embedder,
            &store,
            &cache,
            &chunks,
        )
        .await
        .expect("retrieve should succeed");

        assert!(!output.blocked);
        assert!(!output.chunks.is_empty());
        assert!(output.chunks[0].chunk_text.starts_with("[RETRIEVED GUIDELINES"));
    }

    #[tokio::test]
    async fn over_hard_max_query_is_blocked() {
        let (embedder, store, cache, chunks) = build_fixture().await;
        let tuning = RetrievalTuning::default();
        let long_query = "a".repeat(600);

        let output = retrieve(long_query, 2, vec![], &tuning, &embedder, &store, &cache, &chunks)
            .await
            .expect("retrieve should succeed even when blocked");

        assert!(output.blocked);
        assert!(output.chunks.is_empty());
    }

    #[tokio::test]
    async fn repeated_query_hits_cache_on_second_call() {
        let (embedder, store, cache, chunks) = build_fixture().await;
        let tuning = RetrievalTuning {
            similarity_threshold: -1.0,
            ..RetrievalTuning::default()
        };

        let first = retrieve(
            "fluid resuscitation".to_string(),
            2,
            vec![],
            &tuning,
            &embedder,
            &store,
            &cache,
            &chunks,
        )
        .await
        .expect("first retrieve");
        let key = QueryCache::key("fluid resuscitation", &[], 2);
        assert!(cache.get(&key).is_some());
        assert_eq!(first.chunks.len(), cache.get(&key).expect("cached").len());
    }
}
