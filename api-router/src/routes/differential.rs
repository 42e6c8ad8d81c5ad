//! `POST /differential`: always opens a fresh session — it never
//! takes a session id — builds an initial differential from patient
//! history, lab values and optional image context, and runs it through the
//! same hallucination-guard correction loop debate turns use.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use common::clinical::{Diagnosis, LabStatus, LabValue, ReferenceRange};
use common::error::AppError;
use serde::{Deserialize, Serialize};
use specialist_invoker::{PromptMaterial, TaskKind};

use crate::api_state::ApiState;
use crate::error::ApiError;
use crate::support::{invoke_with_hallucination_guard, validate_patient_history};

const DIFFERENTIAL_SCHEMA_INSTRUCTION: &str = "Produce an initial differential diagnosis from the patient \
history, lab values, and any image context provided. Respond with a single JSON object only: {\"differential\": \
[{\"name\": string, \"probability\": \"high\"|\"medium\"|\"low\", \"supporting_evidence\": string[], \
\"against_evidence\": string[], \"suggested_tests\": string[]}], \"raw_citations\": [{\"organization\": \
string|null, \"text\": string, \"url\": string|null, \"doc_id\": string|null}]}. At most one diagnosis may be \
\"high\" probability unless the evidence strongly supports more.";

#[derive(Debug, Deserialize)]
struct LabValueInput {
    value: f64,
    unit: String,
    #[serde(default)]
    reference_range: Option<ReferenceRange>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DifferentialRequest {
    patient_history: String,
    #[serde(default)]
    lab_values: HashMap<String, LabValueInput>,
    #[serde(default)]
    image_context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DifferentialResponse {
    differential: Vec<Diagnosis>,
    session_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    validation_warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DifferentialOutput {
    #[serde(default)]
    differential: Vec<Diagnosis>,
}

fn to_lab_value(test_name: String, input: LabValueInput) -> LabValue {
    let status = match input.status.as_deref() {
        Some("high") => LabStatus::High,
        Some("low") => LabStatus::Low,
        Some("normal") => LabStatus::Normal,
        _ => input
            .reference_range
            .as_ref()
            .map(|r| r.classify(input.value))
            .unwrap_or(LabStatus::Normal),
    };
    LabValue {
        test_name,
        value: input.value,
        unit: input.unit,
        reference_range: input.reference_range,
        status,
    }
}

pub async fn differential(
    State(state): State<ApiState>,
    Json(request): Json<DifferentialRequest>,
) -> Result<Json<DifferentialResponse>, ApiError> {
    validate_patient_history(&request.patient_history)?;

    let lab_values: Vec<LabValue> = request
        .lab_values
        .into_iter()
        .map(|(name, input)| to_lab_value(name, input))
        .collect();

    let (session_id, entry) = state.session_store.create();
    {
        let mut guard = entry.try_lock()?;
        guard.set_patient_history(&request.patient_history);
        guard.lab_values = lab_values;
        guard.image_context = request.image_context.clone();
    }
    let clinical_state = entry.try_lock()?.clone();

    let material = PromptMaterial {
        patient_history: clinical_state.patient_history.clone(),
        differential: Vec::new(),
        key_findings: Vec::new(),
        rounds: Vec::new(),
        image_context: clinical_state.image_context.clone(),
        rag_chunks: Vec::new(),
        user_challenge: DIFFERENTIAL_SCHEMA_INSTRUCTION.to_string(),
        existing_citations: Vec::new(),
    };

    let (raw_text, validation_warnings, retried) = invoke_with_hallucination_guard(
        state.specialist_transport.as_ref(),
        &state.config.specialist,
        &clinical_state,
        material,
        TaskKind::StructuredJson,
        state.config.specialist.context_limit / 4,
    )
    .await?;

    if retried {
        state.counters.differential_concise_retry_count.fetch_add(1, Ordering::Relaxed);
    }
    if !validation_warnings.is_empty() {
        state
            .counters
            .validation_warning_count
            .fetch_add(validation_warnings.len() as u64, Ordering::Relaxed);
    }

    let value = json_stream_parser::repair::repair_and_parse(&raw_text).map_err(AppError::ParseFailure)?;
    let parsed: DifferentialOutput = serde_json::from_value(value)
        .map_err(|err| AppError::ParseFailure(format!("differential JSON did not match expected shape: {err}")))?;

    let differential = {
        let mut guard = entry.try_lock()?;
        guard.differential = parsed.differential;
        guard.enforce_invariants();
        guard.differential.clone()
    };

    Ok(Json(DifferentialResponse {
        differential,
        session_id,
        validation_warnings,
    }))
}
