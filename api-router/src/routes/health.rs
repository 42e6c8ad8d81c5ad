//! `GET /health`: a cheap, always-responsive status probe. Never acquires
//! the concurrency semaphore and never calls a model — it reports
//! counters, RAG index status, concurrency, and session bookkeeping,
//! nothing more.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api_state::ApiState;

#[derive(Serialize)]
struct RagStatus {
    fingerprint: String,
    chunk_count: usize,
}

#[derive(Serialize)]
struct ConcurrencyStatus {
    target: usize,
    hard_max: usize,
    available_permits: usize,
}

#[derive(Serialize)]
struct SessionsStatus {
    count: usize,
    max: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    counters: common::counters::CountersSnapshot,
    rag: RagStatus,
    concurrency: ConcurrencyStatus,
    sessions: SessionsStatus,
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        counters: state.counters.snapshot(),
        rag: RagStatus {
            fingerprint: state.rag_fingerprint.clone(),
            chunk_count: state.rag_index_chunks.len(),
        },
        concurrency: ConcurrencyStatus {
            target: state.config.concurrency.target_input_concurrency,
            hard_max: state.config.concurrency.hard_max_input_concurrency,
            available_permits: state.concurrency.available_permits(),
        },
        sessions: SessionsStatus {
            count: state.session_store.len(),
            max: state.config.session.max_sessions,
        },
    })
}
