//! Eight-stage retrieval pipeline, run linearly against a shared mutable
//! context: each stage owns one concern and can short-circuit the
//! remaining stages by setting `ctx.blocked` or `ctx.chunks` directly.

mod stages;

pub use stages::{
    CacheLookupStage, CacheStoreStage, ClampStage, DiversityCompactionStage, EmbedStage, RelevanceFilterStage,
    SanitizeStage, SearchStage, ValidateStage,
};

use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

use common::clinical::GuidelineChunk;
use common::embedding::EmbeddingProvider;
use common::error::AppError;
use common::vector_store::VectorStore;

use crate::cache::QueryCache;
use crate::config::RetrievalTuning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Validate,
    Clamp,
    CacheLookup,
    Embed,
    Search,
    RelevanceFilter,
    DiversityCompaction,
    Sanitize,
    CacheStore,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub struct ScoredChunk {
    pub chunk: GuidelineChunk,
    pub score: f32,
}

/// Mutable state threaded through the pipeline's stages.
pub struct PipelineContext<'a> {
    pub query: String,
    pub top_k: usize,
    pub topic_hints: Vec<String>,
    pub tuning: &'a RetrievalTuning,
    pub embedder: &'a dyn EmbeddingProvider,
    pub store: &'a dyn VectorStore,
    pub cache: &'a QueryCache,
    pub index_chunks: &'a [GuidelineChunk],

    pub cache_key: String,
    pub blocked: bool,
    pub cache_hit: Option<Vec<GuidelineChunk>>,
    pub query_embedding: Option<Vec<f32>>,
    pub candidates: Vec<ScoredChunk>,
    pub filtered: Vec<ScoredChunk>,
    pub selected: Vec<GuidelineChunk>,
    pub sanitized: Vec<GuidelineChunk>,
}

impl<'a> PipelineContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        query: String,
        top_k: usize,
        topic_hints: Vec<String>,
        tuning: &'a RetrievalTuning,
        embedder: &'a dyn EmbeddingProvider,
        store: &'a dyn VectorStore,
        cache: &'a QueryCache,
        index_chunks: &'a [GuidelineChunk],
    ) -> Self {
        Self {
            query,
            top_k,
            topic_hints,
            tuning,
            embedder,
            store,
            cache,
            index_chunks,
            cache_key: String::new(),
            blocked: false,
            cache_hit: None,
            query_embedding: None,
            candidates: Vec::new(),
            filtered: Vec::new(),
            selected: Vec::new(),
            sanitized: Vec::new(),
        }
    }
}

pub struct RetrieveOutput {
    pub chunks: Vec<GuidelineChunk>,
    pub blocked: bool,
}

fn stages() -> Vec<Box<dyn PipelineStage>> {
    vec![
        Box::new(ValidateStage),
        Box::new(ClampStage),
        Box::new(CacheLookupStage),
        Box::new(EmbedStage),
        Box::new(SearchStage),
        Box::new(RelevanceFilterStage),
        Box::new(DiversityCompactionStage),
        Box::new(SanitizeStage),
        Box::new(CacheStoreStage),
    ]
}

/// Runs the full retrieval pipeline for one query. Embedding/index faults
/// never fail the call: callers proceed without guidelines rather than
/// fail the turn (see `EmbedStage`/`SearchStage`).
#[allow(clippy::too_many_arguments)]
pub async fn retrieve(
    query: String,
    top_k: usize,
    topic_hints: Vec<String>,
    tuning: &RetrievalTuning,
    embedder: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    cache: &QueryCache,
    index_chunks: &[GuidelineChunk],
) -> Result<RetrieveOutput, AppError> {
    let mut ctx = PipelineContext::new(query, top_k, topic_hints, tuning, embedder, store, cache, index_chunks);

    for stage in stages() {
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        info!(stage = ?stage.kind(), elapsed_ms = start.elapsed().as_millis(), "retrieval stage complete");
        if ctx.blocked || ctx.cache_hit.is_some() {
            break;
        }
    }

    if ctx.blocked {
        return Ok(RetrieveOutput {
            chunks: Vec::new(),
            blocked: true,
        });
    }
    if let Some(hit) = ctx.cache_hit.take() {
        return Ok(RetrieveOutput {
            chunks: hit,
            blocked: false,
        });
    }

    Ok(RetrieveOutput {
        chunks: ctx.sanitized,
        blocked: false,
    })
}
