//! `POST /debate-turn`: resolves or mints the session, decodes an
//! optional attached image, then hands everything off to the orchestrator's
//! `run_debate_turn`, which owns the orchestrated/specialist-only fallback
//! and the session-lock-for-the-whole-turn discipline.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::clinical::{Citation, Diagnosis};
use common::error::AppError;
use serde::{Deserialize, Serialize};
use session_store::SessionLookup;

use crate::api_state::ApiState;
use crate::error::ApiError;
use crate::support::validate_user_challenge;

#[derive(Debug, Deserialize)]
pub struct DebateTurnRequest {
    #[serde(default)]
    session_id: Option<String>,
    user_challenge: String,
    #[serde(default)]
    image_base64: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DebateTurnResponse {
    session_id: String,
    ai_response: String,
    updated_differential: Vec<Diagnosis>,
    citations: Vec<Citation>,
    has_guidelines: bool,
    rag_used: bool,
    orchestrated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    validation_warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_test: Option<String>,
}

impl From<orchestrator::DebateTurnResponse> for DebateTurnResponse {
    fn from(outcome: orchestrator::DebateTurnResponse) -> Self {
        Self {
            session_id: outcome.session_id,
            ai_response: outcome.ai_response,
            updated_differential: outcome.updated_differential,
            citations: outcome.citations,
            has_guidelines: outcome.has_guidelines,
            rag_used: outcome.rag_used,
            orchestrated: outcome.orchestrated,
            validation_warnings: outcome.validation_warnings,
            suggested_test: outcome.suggested_test,
        }
    }
}

pub async fn debate_turn(
    State(state): State<ApiState>,
    Json(request): Json<DebateTurnRequest>,
) -> Result<Json<DebateTurnResponse>, ApiError> {
    validate_user_challenge(&request.user_challenge)?;

    let image_png_bytes = match request.image_base64 {
        Some(encoded) => Some(
            BASE64
                .decode(encoded.as_bytes())
                .map_err(|err| AppError::InputInvalid(format!("image_base64 is not valid base64: {err}")))?,
        ),
        None => None,
    };

    let session_id = match state.session_store.get_or_create(request.session_id) {
        SessionLookup::Existing(id, _) | SessionLookup::Created(id, _) => id,
        SessionLookup::Unknown => return Err(AppError::NotFound("unknown session".to_string()).into()),
    };

    let outcome = orchestrator::run_debate_turn(
        &state.session_store,
        &session_id,
        request.user_challenge,
        image_png_bytes,
        state.orchestrated_executor.as_ref(),
        state.specialist_only_executor.as_ref(),
    )
    .await
    .inspect_err(|err| {
        if matches!(err, AppError::SessionBusy) {
            state.counters.session_busy_count.fetch_add(1, Ordering::Relaxed);
        }
    })?;

    if !outcome.orchestrated {
        state.counters.orchestrator_fallback_count.fetch_add(1, Ordering::Relaxed);
    }
    if !outcome.validation_warnings.is_empty() {
        state
            .counters
            .validation_warning_count
            .fetch_add(outcome.validation_warnings.len() as u64, Ordering::Relaxed);
    }

    Ok(Json(outcome.into()))
}
