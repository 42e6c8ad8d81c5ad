//! `POST /summary`: a final structured synthesis over the whole
//! session — distinct shape from a debate turn's `SynthesisOutput`, so it
//! gets its own schema instruction and parse target, but reuses the same
//! hallucination-guard correction loop.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use common::error::AppError;
use serde::{Deserialize, Serialize};
use specialist_invoker::{PromptMaterial, TaskKind};

use crate::api_state::ApiState;
use crate::error::ApiError;
use crate::support::invoke_with_hallucination_guard;

const SUMMARY_SCHEMA_INSTRUCTION: &str = "Produce a final structured summary of this diagnostic session. \
Respond with a single JSON object only: {\"final_diagnosis\": string, \"confidence\": integer 0-100, \
\"reasoning_chain\": string[], \"next_steps\": string[], \"ruled_out\": [{\"diagnosis\": string, \"reason\": \
string}]}. Base the confidence on how well the current differential and evidence converge on one diagnosis.";

const SUMMARY_MAX_OUTPUT_TOKENS: u32 = 1600;

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuledOutSummary {
    diagnosis: String,
    reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    final_diagnosis: String,
    confidence: u8,
    reasoning_chain: Vec<String>,
    next_steps: Vec<String>,
    ruled_out: Vec<RuledOutSummary>,
}

pub async fn summary(
    State(state): State<ApiState>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let clinical_state = state.session_store.snapshot(&request.session_id).await?;

    let material = PromptMaterial {
        patient_history: clinical_state.patient_history.clone(),
        differential: clinical_state.differential.clone(),
        key_findings: clinical_state.key_findings.clone(),
        rounds: clinical_state
            .rounds
            .iter()
            .map(|r| specialist_invoker::RoundMaterial {
                user_challenge: r.user_challenge.clone(),
                ai_response: r.ai_response.clone(),
            })
            .collect(),
        image_context: clinical_state.image_context.clone(),
        rag_chunks: Vec::new(),
        user_challenge: SUMMARY_SCHEMA_INSTRUCTION.to_string(),
        existing_citations: Vec::new(),
    };

    let (raw_text, validation_warnings, retried) = invoke_with_hallucination_guard(
        state.specialist_transport.as_ref(),
        &state.config.specialist,
        &clinical_state,
        material,
        TaskKind::StructuredJson,
        SUMMARY_MAX_OUTPUT_TOKENS,
    )
    .await?;

    if retried {
        state.counters.summary_concise_retry_count.fetch_add(1, Ordering::Relaxed);
    }
    if !validation_warnings.is_empty() {
        state
            .counters
            .validation_warning_count
            .fetch_add(validation_warnings.len() as u64, Ordering::Relaxed);
    }

    let value = json_stream_parser::repair::repair_and_parse(&raw_text).map_err(AppError::ParseFailure)?;
    let mut parsed: SummaryResponse = serde_json::from_value(value)
        .map_err(|err| AppError::ParseFailure(format!("summary JSON did not match expected shape: {err}")))?;
    parsed.confidence = parsed.confidence.min(100);

    Ok(Json(parsed))
}
