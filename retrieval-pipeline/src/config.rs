//! Tunable parameters governing every retrieval stage: one struct, one
//! `Default` impl, named constants rather than inline magic numbers
//! scattered through the stages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Hard security maximum on raw query length; longer queries are
    /// blocked outright rather than trimmed.
    pub hard_max_query_chars: usize,
    /// Soft max; queries between this and `hard_max_query_chars` are
    /// clamped rather than blocked.
    pub soft_max_query_chars: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub similarity_threshold: f32,
    /// Search candidates fetched are `top_k * candidate_multiplier`.
    pub candidate_multiplier: usize,
    pub max_chunks_per_doc: usize,
    pub max_chunks_per_topic: usize,
    pub chunk_window_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            hard_max_query_chars: 500,
            soft_max_query_chars: 480,
            cache_ttl_secs: 900,
            cache_max_entries: 256,
            similarity_threshold: 0.35,
            candidate_multiplier: 2,
            max_chunks_per_doc: 2,
            max_chunks_per_topic: 1,
            chunk_window_chars: 1200,
            chunk_overlap_chars: 500,
        }
    }
}
