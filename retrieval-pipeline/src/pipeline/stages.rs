use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use common::clinical::GuidelineChunk;
use common::error::AppError;

use crate::cache::QueryCache;
use crate::sanitize::{sanitize_chunk_text, wrap_with_markers};

use super::{PipelineContext, PipelineStage, ScoredChunk, StageKind};

static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]").expect("static regex is valid"));
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").expect("static regex is valid"));

/// Stage 1: reject queries over the hard security maximum, strip control
/// characters, and redact digit runs before anything is logged.
pub struct ValidateStage;

#[async_trait]
impl PipelineStage for ValidateStage {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        ctx.query = CONTROL_CHARS.replace_all(&ctx.query, "").to_string();

        if ctx.query.chars().count() > ctx.tuning.hard_max_query_chars {
            let redacted = DIGIT_RUN.replace_all(&ctx.query, "[digits]");
            warn!(query_preview = %redacted.chars().take(80).collect::<String>(), "retrieval query exceeds hard maximum, blocking");
            ctx.blocked = true;
        }
        Ok(())
    }
}

/// Stage 2: trim an over-length (but not over-hard-max) query, dropping
/// challenge text first and then any trailing clinical-context suffix,
/// preserving the tail's semantic density.
pub struct ClampStage;

#[async_trait]
impl PipelineStage for ClampStage {
    fn kind(&self) -> StageKind {
        StageKind::Clamp
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let soft_max = ctx.tuning.soft_max_query_chars;
        if ctx.query.chars().count() <= soft_max {
            return Ok(());
        }

        // Prefer trimming from the front (challenge text) so the tail,
        // which tends to carry the clinical context, survives.
        let chars: Vec<char> = ctx.query.chars().collect();
        let overflow = chars.len() - soft_max;
        ctx.query = chars.into_iter().skip(overflow).collect();
        Ok(())
    }
}

/// Stage 3: look up the query cache; on hit, later stages are skipped.
pub struct CacheLookupStage;

#[async_trait]
impl PipelineStage for CacheLookupStage {
    fn kind(&self) -> StageKind {
        StageKind::CacheLookup
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        ctx.cache_key = QueryCache::key(&ctx.query, &ctx.topic_hints, ctx.top_k);
        ctx.cache_hit = ctx.cache.get(&ctx.cache_key);
        Ok(())
    }
}

/// Stage 4a: embed the (possibly clamped) query. Embedding faults are
/// logged and leave `query_embedding` unset; `SearchStage` treats that as
/// "no candidates" rather than failing the turn.
pub struct EmbedStage;

#[async_trait]
impl PipelineStage for EmbedStage {
    fn kind(&self) -> StageKind {
        StageKind::Embed
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        match ctx.embedder.embed(&ctx.query).await {
            Ok(embedding) => ctx.query_embedding = Some(embedding),
            Err(err) => {
                warn!(%err, "retrieval embedding fault, proceeding without guidelines");
            }
        }
        Ok(())
    }
}

/// Stage 4b: query the vector index for up to `2 * top_k` candidates.
pub struct SearchStage;

#[async_trait]
impl PipelineStage for SearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Search
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let Some(embedding) = ctx.query_embedding.clone() else {
            return Ok(());
        };

        let take = ctx.top_k.saturating_mul(ctx.tuning.candidate_multiplier);
        let scored_ids = match ctx.store.query(&embedding, take).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "retrieval index fault, proceeding without guidelines");
                return Ok(());
            }
        };

        for scored in scored_ids {
            if let Some(chunk) = find_chunk(ctx.index_chunks, &scored.id) {
                ctx.candidates.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score: scored.score,
                });
            }
        }
        Ok(())
    }
}

fn find_chunk<'a>(chunks: &'a [GuidelineChunk], id: &str) -> Option<&'a GuidelineChunk> {
    chunks.iter().find(|c| format!("{}#{}", c.doc_id, c.chunk_index) == id)
}

/// Stage 5: drop chunks below the similarity threshold or whose topic
/// conflicts with the caller's `topic_hints`.
pub struct RelevanceFilterStage;

#[async_trait]
impl PipelineStage for RelevanceFilterStage {
    fn kind(&self) -> StageKind {
        StageKind::RelevanceFilter
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let threshold = ctx.tuning.similarity_threshold;
        let hints = &ctx.topic_hints;
        ctx.filtered = std::mem::take(&mut ctx.candidates)
            .into_iter()
            .filter(|scored| scored.score >= threshold)
            .filter(|scored| hints.is_empty() || hints.iter().any(|h| h.eq_ignore_ascii_case(&scored.chunk.topic)))
            .collect();
        Ok(())
    }
}

/// Stage 6: greedy diversity-aware selection. Picks the highest-scoring
/// chunk first, rejecting further chunks beyond `max_chunks_per_doc` per
/// document and `max_chunks_per_topic` per topic bucket, until `top_k` is
/// reached.
pub struct DiversityCompactionStage;

#[async_trait]
impl PipelineStage for DiversityCompactionStage {
    fn kind(&self) -> StageKind {
        StageKind::DiversityCompaction
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let mut ranked = std::mem::take(&mut ctx.filtered);
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut per_doc: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut per_topic: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

        for scored in ranked {
            if ctx.selected.len() >= ctx.top_k {
                break;
            }
            let doc_count = per_doc.entry(scored.chunk.doc_id.clone()).or_insert(0);
            let topic_count = per_topic.entry(scored.chunk.topic.clone()).or_insert(0);
            if *doc_count >= ctx.tuning.max_chunks_per_doc || *topic_count >= ctx.tuning.max_chunks_per_topic {
                continue;
            }
            *doc_count += 1;
            *topic_count += 1;
            ctx.selected.push(scored.chunk);
        }
        Ok(())
    }
}

/// Stage 7: strip code fences, HTML tags, and prompt-injection patterns
/// from chunk text, wrapping the result in delimiter markers.
pub struct SanitizeStage;

#[async_trait]
impl PipelineStage for SanitizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Sanitize
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        ctx.sanitized = std::mem::take(&mut ctx.selected)
            .into_iter()
            .map(|mut chunk| {
                let cleaned = sanitize_chunk_text(&chunk.chunk_text);
                chunk.chunk_text = wrap_with_markers(&cleaned);
                chunk
            })
            .collect();
        Ok(())
    }
}

/// Stage 8: insert the sanitized result into the query cache.
pub struct CacheStoreStage;

#[async_trait]
impl PipelineStage for CacheStoreStage {
    fn kind(&self) -> StageKind {
        StageKind::CacheStore
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        ctx.cache.insert(ctx.cache_key.clone(), ctx.sanitized.clone());
        Ok(())
    }
}
