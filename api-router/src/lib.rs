use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use api_state::ApiState;

pub mod api_state;
pub mod error;
pub mod image_triage;
mod middleware_concurrency;
mod routes;
pub mod support;

const MULTIPART_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Router for API functionality, version 1. `/health` is the only route
/// left outside the concurrency gate; every other route does generative
/// work and acquires a permit from the shared semaphore first.
pub fn api_routes_v1(app_state: ApiState) -> Router {
    let gated = Router::new()
        .route("/extract-labs", post(routes::extract_labs::extract_labs_text))
        .route(
            "/extract-labs-file",
            post(routes::extract_labs::extract_labs_file).layer(DefaultBodyLimit::max(MULTIPART_BODY_LIMIT_BYTES)),
        )
        .route("/differential", post(routes::differential::differential))
        .route("/debate-turn", post(routes::debate_turn::debate_turn))
        .route("/summary", post(routes::summary::summary))
        .route(
            "/analyze-image",
            post(routes::analyze_image::analyze_image).layer(DefaultBodyLimit::max(MULTIPART_BODY_LIMIT_BYTES)),
        )
        .route_layer(from_fn_with_state(app_state.clone(), middleware_concurrency::concurrency_gate));

    let ungated = Router::new().route("/health", get(routes::health::health));

    ungated.merge(gated).with_state(app_state)
}
