//! Input-concurrency gate: every generative
//! route acquires a permit from the shared semaphore before running, so the
//! hard-max bound on concurrent long-running calls holds across all of
//! them. Lightweight routes (`/health`) are never wrapped by this layer and
//! stay responsive regardless of how many generative calls are in flight.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::api_state::ApiState;

pub async fn concurrency_gate(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let _permit = state
        .concurrency
        .acquire()
        .await
        .expect("concurrency semaphore is never closed");
    next.run(request).await
}
