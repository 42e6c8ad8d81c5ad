use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use api_router::api_routes_v1;
use api_router::api_state::ApiStateInner;
use api_router::image_triage::UnconfiguredImageTriage;
use common::config::{get_config, RagConfig};
use common::counters::Counters;
use common::embedding::{EmbeddingProvider, HashedEmbeddingProvider, OpenAiEmbeddingProvider};
use common::vector_store::{BruteForceIndex, VectorStore};
use orchestrator::{OpenAiOrchestratorTransport, OrchestratedExecutor, SpecialistOnlyExecutor};
use retrieval_pipeline::{QueryCache, RagIndex, RetrievalTuning};
use session_store::SessionStore;
use specialist_invoker::OpenAiSpecialistTransport;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RagConfig` only carries the cache knobs exposed as environment
/// variables (`RAG_CACHE_TTL_SECONDS`, `RAG_CACHE_MAX_ENTRIES`);
/// everything else in `RetrievalTuning` keeps its tuned default.
fn retrieval_tuning_from(rag: &RagConfig) -> RetrievalTuning {
    RetrievalTuning {
        cache_ttl_secs: rag.cache_ttl_secs,
        cache_max_entries: rag.cache_max_entries,
        ..RetrievalTuning::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let http_port = config.http_port;

    let embedder: Arc<dyn EmbeddingProvider> = if config.embedding.api_key.is_empty() {
        warn!("no embedding API key configured; falling back to a deterministic hashed embedder");
        Arc::new(HashedEmbeddingProvider::new(config.embedding.dimension as usize))
    } else {
        Arc::new(OpenAiEmbeddingProvider::new(
            &config.embedding.base_url,
            &config.embedding.api_key,
            config.embedding.model.clone(),
            config.embedding.dimension,
        ))
    };

    let vector_store: Arc<dyn VectorStore> = Arc::new(BruteForceIndex::new());
    let retrieval_tuning = retrieval_tuning_from(&config.rag);

    let guideline_dir = Path::new(&config.rag.guideline_dir);
    let rag_index = match RagIndex::build_from_dir(guideline_dir, &retrieval_tuning, embedder.as_ref(), vector_store.as_ref()).await {
        Ok(index) => index,
        Err(err) => {
            warn!(error = %err, dir = %config.rag.guideline_dir, "failed to build RAG index at startup; serving with an empty guideline set");
            RagIndex {
                chunks: Vec::new(),
                fingerprint: String::new(),
            }
        }
    };
    info!(chunk_count = rag_index.chunks.len(), fingerprint = %rag_index.fingerprint, "RAG index ready");

    if !config.image_triage.enabled {
        info!("image triage disabled (DISABLE_MEDSIGLIP set); every image is triaged as uncertain");
    }

    let specialist_transport = Arc::new(OpenAiSpecialistTransport::new(&config.specialist));
    let orchestrator_transport: Arc<dyn orchestrator::OrchestratorTransport> =
        Arc::new(OpenAiOrchestratorTransport::new(&config.orchestrator));

    let query_cache = Arc::new(QueryCache::new(Duration::from_secs(config.rag.cache_ttl_secs), config.rag.cache_max_entries));
    let index_chunks = Arc::new(rag_index.chunks);

    let counters = Arc::new(Counters::new());

    let orchestrated_executor: Arc<dyn orchestrator::DebateExecutor> = Arc::new(OrchestratedExecutor {
        orchestrator_transport: orchestrator_transport.clone(),
        specialist_transport: specialist_transport.clone(),
        specialist_config: config.specialist.clone(),
        embedder: embedder.clone(),
        vector_store: vector_store.clone(),
        query_cache: query_cache.clone(),
        retrieval_tuning: retrieval_tuning.clone(),
        index_chunks: index_chunks.clone(),
        counters: counters.clone(),
    });
    let specialist_only_executor: Arc<dyn orchestrator::DebateExecutor> = Arc::new(SpecialistOnlyExecutor {
        specialist_transport: specialist_transport.clone(),
        specialist_config: config.specialist.clone(),
    });

    let concurrency = Semaphore::new(config.concurrency.hard_max_input_concurrency);
    let session_store = SessionStore::new(config.session.max_sessions, config.session.max_serialized_bytes);

    let state = Arc::new(ApiStateInner {
        image_triage: Arc::new(UnconfiguredImageTriage),
        rag_fingerprint: rag_index.fingerprint,
        retrieval_tuning,
        rag_index_chunks: index_chunks,
        config,
        counters,
        session_store,
        orchestrated_executor,
        specialist_only_executor,
        specialist_transport,
        orchestrator_transport,
        embedder,
        vector_store,
        query_cache,
        concurrency,
        started_at: Instant::now(),
    });

    let app = api_routes_v1(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await?;
    info!(port = http_port, "sturgeon listening");
    axum::serve(listener, app).await?;

    Ok(())
}
