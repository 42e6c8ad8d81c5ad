//! `POST /analyze-image`: a standalone image read — no session
//! involved. Runs the optional triage classifier to seed the specialist's
//! prompt, then dispatches straight to the specialist invoker; refusal
//! recovery is
//! `invoke`'s job, not this handler's.

use axum::extract::State;
use axum::Json;
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::error::AppError;
use serde::Serialize;
use specialist_invoker::{InvokeOptions, PromptMaterial, TaskKind};
use tempfile::NamedTempFile;

use crate::api_state::ApiState;
use crate::error::ApiError;
use crate::image_triage::TriageResult;
use crate::support::MAX_MULTIPART_FILE_BYTES;

const IMAGE_ANALYSIS_PROMPT: &str = "Describe the clinically relevant visual findings in this image and state \
what differential considerations they raise. This is for educational triage support, not a final diagnosis.";

#[derive(Debug, TryFromMultipart)]
pub struct AnalyzeImageRequest {
    #[form_data(limit = "10MiB")]
    file: FieldData<NamedTempFile>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeImageResponse {
    modality: String,
    triage: TriageResult,
    interpretation: String,
}

pub async fn analyze_image(
    State(state): State<ApiState>,
    TypedMultipart(request): TypedMultipart<AnalyzeImageRequest>,
) -> Result<Json<AnalyzeImageResponse>, ApiError> {
    let bytes = std::fs::read(request.file.contents.path()).map_err(AppError::from)?;
    if bytes.is_empty() {
        return Err(AppError::InputInvalid("uploaded file is empty".to_string()).into());
    }
    if bytes.len() > MAX_MULTIPART_FILE_BYTES {
        return Err(AppError::InputInvalid("uploaded file exceeds the maximum accepted size".to_string()).into());
    }

    let triage = state.image_triage.triage(&bytes).await;

    let material = PromptMaterial {
        patient_history: String::new(),
        differential: Vec::new(),
        key_findings: Vec::new(),
        rounds: Vec::new(),
        image_context: Some(triage.to_prompt_summary()),
        rag_chunks: Vec::new(),
        user_challenge: IMAGE_ANALYSIS_PROMPT.to_string(),
        existing_citations: Vec::new(),
    };

    let response = specialist_invoker::invoke(
        state.specialist_transport.as_ref(),
        &state.config.specialist,
        material,
        InvokeOptions {
            task_kind: TaskKind::ImageAnalysis,
            requested_max_output_tokens: state.config.specialist.context_limit / 4,
            image_png_bytes: Some(bytes),
        },
    )
    .await?;

    Ok(Json(AnalyzeImageResponse {
        modality: triage.modality.clone(),
        triage,
        interpretation: response.text,
    }))
}
