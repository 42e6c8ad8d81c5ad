//! `POST /extract-labs` and `POST /extract-labs-file`: the deterministic
//! parser gets first look; only text it can't recognize
//! as a lab report falls through to a JSON-schema-hinted specialist call.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::clinical::LabValue;
use common::error::AppError;
use lab_parser::{extract_labs_from_plain_text, ExtractionPath, LabExtraction};
use serde::{Deserialize, Serialize};
use specialist_invoker::{PromptMaterial, TaskKind};
use tempfile::NamedTempFile;

use crate::api_state::ApiState;
use crate::error::ApiError;

const LLM_FALLBACK_SCHEMA_INSTRUCTION: &str = "The attached text could not be recognized as a structured lab \
report by the deterministic parser. Extract every lab value you can find and respond with a single JSON object \
only: {\"labs\": [{\"test_name\": string, \"value\": number, \"unit\": string, \"reference_range\": {\"low\": \
number, \"high\": number}|null, \"status\": \"normal\"|\"high\"|\"low\"}]}. If you find none, return {\"labs\": \
[]}.";

#[derive(Debug, Deserialize)]
pub struct ExtractLabsRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractLabsResponse {
    pub lab_values: Vec<LabValue>,
    pub abnormal_count: usize,
    pub path: &'static str,
}

impl ExtractLabsResponse {
    fn from_extraction(extraction: LabExtraction) -> Self {
        let path = match extraction.path {
            ExtractionPath::TableFast => "table-fast",
            ExtractionPath::TableFull => "table-full",
            ExtractionPath::FlatFull => "flat-full",
        };
        Self {
            lab_values: extraction.labs,
            abnormal_count: extraction.abnormal_count,
            path,
        }
    }

    fn llm_fallback(labs: Vec<LabValue>) -> Self {
        let abnormal_count = labs
            .iter()
            .filter(|l| l.status != common::clinical::LabStatus::Normal)
            .count();
        Self {
            lab_values: labs,
            abnormal_count,
            path: "llm_fallback",
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmLabRow {
    test_name: String,
    value: f64,
    unit: String,
    #[serde(default)]
    reference_range: Option<common::clinical::ReferenceRange>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LlmLabsPayload {
    #[serde(default)]
    labs: Vec<LlmLabRow>,
}

fn to_lab_value(row: LlmLabRow) -> LabValue {
    let status = match row.status.as_deref() {
        Some("high") => common::clinical::LabStatus::High,
        Some("low") => common::clinical::LabStatus::Low,
        Some("normal") => common::clinical::LabStatus::Normal,
        _ => row
            .reference_range
            .as_ref()
            .map(|r| r.classify(row.value))
            .unwrap_or(common::clinical::LabStatus::Normal),
    };
    LabValue {
        test_name: row.test_name,
        value: row.value,
        unit: row.unit,
        reference_range: row.reference_range,
        status,
    }
}

/// Asks the specialist to extract labs from text the deterministic parser
/// couldn't recognize. No session is involved, so there is nothing for the
/// hallucination validator to check the output against; the specialist's
/// own JSON-schema instruction is the only guardrail here.
async fn llm_fallback_extract(state: &ApiState, text: &str) -> Result<ExtractLabsResponse, ApiError> {
    let material = PromptMaterial {
        patient_history: text.to_string(),
        differential: Vec::new(),
        key_findings: Vec::new(),
        rounds: Vec::new(),
        image_context: None,
        rag_chunks: Vec::new(),
        user_challenge: LLM_FALLBACK_SCHEMA_INSTRUCTION.to_string(),
        existing_citations: Vec::new(),
    };

    let response = specialist_invoker::invoke(
        state.specialist_transport.as_ref(),
        &state.config.specialist,
        material,
        specialist_invoker::InvokeOptions {
            task_kind: TaskKind::StructuredJson,
            requested_max_output_tokens: state.config.specialist.context_limit / 4,
            image_png_bytes: None,
        },
    )
    .await?;

    let value = json_stream_parser::repair::repair_and_parse(&response.text).map_err(AppError::ParseFailure)?;
    let payload: LlmLabsPayload =
        serde_json::from_value(value).map_err(|err| AppError::ParseFailure(format!("extract-labs fallback JSON did not match expected shape: {err}")))?;

    state.counters.extract_labs_llm_fallback_count.fetch_add(1, Ordering::Relaxed);
    Ok(ExtractLabsResponse::llm_fallback(payload.labs.into_iter().map(to_lab_value).collect()))
}

pub async fn extract_labs_text(
    State(state): State<ApiState>,
    Json(request): Json<ExtractLabsRequest>,
) -> Result<Json<ExtractLabsResponse>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(AppError::InputInvalid("text must not be empty".to_string()).into());
    }
    if request.text.len() > crate::support::MAX_PLAIN_TEXT_LAB_REPORT_BYTES {
        return Err(AppError::InputInvalid("text exceeds the maximum accepted size".to_string()).into());
    }

    match extract_labs_from_plain_text(&request.text) {
        Ok(extraction) => {
            state.counters.extract_labs_fast_path_count.fetch_add(1, Ordering::Relaxed);
            Ok(Json(ExtractLabsResponse::from_extraction(extraction)))
        }
        Err(AppError::ParseFailure(_)) => Ok(Json(llm_fallback_extract(&state, &request.text).await?)),
        Err(other) => Err(other.into()),
    }
}

#[derive(Debug, TryFromMultipart)]
pub struct ExtractLabsFileRequest {
    #[form_data(limit = "10MiB")]
    file: FieldData<NamedTempFile>,
}

fn is_pdf(field: &FieldData<NamedTempFile>) -> bool {
    let content_type_is_pdf = field
        .metadata
        .content_type
        .as_deref()
        .is_some_and(|ct| ct == "application/pdf");
    let name_is_pdf = field
        .metadata
        .file_name
        .as_deref()
        .is_some_and(|name| name.to_lowercase().ends_with(".pdf"));
    content_type_is_pdf || name_is_pdf
}

pub async fn extract_labs_file(
    State(state): State<ApiState>,
    TypedMultipart(request): TypedMultipart<ExtractLabsFileRequest>,
) -> Result<Json<ExtractLabsResponse>, ApiError> {
    let pdf = is_pdf(&request.file);
    let bytes = std::fs::read(request.file.contents.path()).map_err(AppError::from)?;
    if bytes.len() > crate::support::MAX_MULTIPART_FILE_BYTES {
        return Err(AppError::InputInvalid("uploaded file exceeds the maximum accepted size".to_string()).into());
    }

    let extracted_text = if pdf {
        lab_parser::extract::extract_pdf_text(bytes).await?
    } else {
        let text = String::from_utf8_lossy(&bytes).to_string();
        lab_parser::extract::extract_plain_text(&text)
    };

    match lab_parser::extract_labs_from_text(&extracted_text) {
        Ok(extraction) => {
            state.counters.extract_labs_fast_path_count.fetch_add(1, Ordering::Relaxed);
            Ok(Json(ExtractLabsResponse::from_extraction(extraction)))
        }
        Err(AppError::ParseFailure(_)) => Ok(Json(llm_fallback_extract(&state, &extracted_text.full).await?)),
        Err(other) => Err(other.into()),
    }
}
