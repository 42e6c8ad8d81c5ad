//! Shared request state: every collaborator an endpoint handler needs,
//! constructed once at startup by `main` and cloned cheaply (it is an
//! `Arc<ApiStateInner>`) into each request.

use std::sync::Arc;
use std::time::Instant;

use common::clinical::GuidelineChunk;
use common::config::AppConfig;
use common::counters::Counters;
use common::embedding::EmbeddingProvider;
use common::vector_store::VectorStore;
use orchestrator::{DebateExecutor, OrchestratorTransport};
use retrieval_pipeline::{QueryCache, RetrievalTuning};
use session_store::SessionStore;
use specialist_invoker::SpecialistTransport;
use tokio::sync::Semaphore;

use crate::image_triage::ImageTriage;

pub struct ApiStateInner {
    pub config: AppConfig,
    pub counters: Arc<Counters>,
    pub session_store: SessionStore,

    pub orchestrated_executor: Arc<dyn DebateExecutor>,
    pub specialist_only_executor: Arc<dyn DebateExecutor>,
    pub specialist_transport: Arc<dyn SpecialistTransport>,
    pub orchestrator_transport: Arc<dyn OrchestratorTransport>,

    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    pub query_cache: Arc<QueryCache>,
    pub retrieval_tuning: RetrievalTuning,
    pub rag_index_chunks: Arc<Vec<GuidelineChunk>>,
    pub rag_fingerprint: String,

    pub image_triage: Arc<dyn ImageTriage>,

    /// Bounds input concurrency at `config.concurrency.hard_max_input_concurrency`;
    /// acquired by every route except the liveness endpoint so health
    /// checks stay responsive under load.
    pub concurrency: Semaphore,

    pub started_at: Instant,
}

/// Cheap-to-clone application state handed to every axum handler.
pub type ApiState = Arc<ApiStateInner>;
