//! Shared glue used by more than one route handler: the hallucination-guard
//! invoke loop (the same one-shot corrective retry the orchestrator runs
//! for debate turns, applied here to `/differential` and `/summary`'s own
//! generative calls) and the endpoint-level input caps.

use common::clinical::ClinicalState;
use common::config::SpecialistConfig;
use common::error::AppError;
use hallucination_validator::{allowed_lab_names, build_allowed_values, validate};
use specialist_invoker::{invoke, InvokeOptions, PromptMaterial, SpecialistTransport, TaskKind};
use tracing::warn;

/// Input caps the endpoint handlers enforce before doing any generative
/// work.
pub const MAX_USER_CHALLENGE_CHARS: usize = 500;
pub const MAX_RAW_PATIENT_HISTORY_BYTES: usize = 64 * 1024;
pub const MAX_PLAIN_TEXT_LAB_REPORT_BYTES: usize = 256 * 1024;
pub const MAX_MULTIPART_FILE_BYTES: usize = 10 * 1024 * 1024;

pub fn validate_patient_history(text: &str) -> Result<(), AppError> {
    if text.trim().is_empty() {
        return Err(AppError::InputInvalid("patient_history must not be empty".to_string()));
    }
    if text.len() > MAX_RAW_PATIENT_HISTORY_BYTES {
        return Err(AppError::InputInvalid(format!(
            "patient_history exceeds {MAX_RAW_PATIENT_HISTORY_BYTES} bytes"
        )));
    }
    Ok(())
}

pub fn validate_user_challenge(text: &str) -> Result<(), AppError> {
    if text.trim().is_empty() {
        return Err(AppError::InputInvalid("user_challenge must not be empty".to_string()));
    }
    if text.chars().count() > MAX_USER_CHALLENGE_CHARS {
        return Err(AppError::InputInvalid(format!(
            "user_challenge exceeds {MAX_USER_CHALLENGE_CHARS} characters"
        )));
    }
    Ok(())
}

/// Calls the specialist, validates its answer against the session's
/// user-supplied data, and — on a failed validation — issues exactly one
/// corrective re-call before proceeding regardless. Identical in shape
/// to the orchestrator's own
/// `specialist_call_with_validation_loop`; duplicated here because the
/// `/differential` and `/summary` handlers drive this loop directly
/// rather than through a debate turn.
pub async fn invoke_with_hallucination_guard(
    transport: &dyn SpecialistTransport,
    config: &SpecialistConfig,
    state: &ClinicalState,
    material: PromptMaterial,
    task_kind: TaskKind,
    requested_max_output_tokens: u32,
) -> Result<(String, Vec<String>, bool), AppError> {
    let allowed_values = build_allowed_values(state);
    let allowed_names = allowed_lab_names(state);

    let first = invoke(
        transport,
        config,
        material.clone(),
        InvokeOptions {
            task_kind,
            requested_max_output_tokens,
            image_png_bytes: None,
        },
    )
    .await?;

    let first_check = validate(&first.text, &allowed_values, &allowed_names);
    if first_check.ok {
        return Ok((first.text, Vec::new(), false));
    }

    let correction_prompt = first_check
        .suggested_correction_prompt
        .clone()
        .unwrap_or_else(|| "Use only the lab values explicitly provided; do not fabricate.".to_string());
    let mut corrected_material = material;
    corrected_material.user_challenge = format!("{}\n\n{correction_prompt}", corrected_material.user_challenge);

    let second = invoke(
        transport,
        config,
        corrected_material,
        InvokeOptions {
            task_kind,
            requested_max_output_tokens,
            image_png_bytes: None,
        },
    )
    .await?;

    let second_check = validate(&second.text, &allowed_values, &allowed_names);
    if second_check.ok {
        return Ok((second.text, Vec::new(), true));
    }

    warn!(
        session_id = %state.session_id,
        offending = second_check.offending.len(),
        "hallucination validator still flagging output after corrective retry; returning best-effort response"
    );
    let warnings = second_check
        .offending
        .iter()
        .map(|v| format!("unverified value {} {}", v.value, v.unit))
        .collect();
    Ok((second.text, warnings, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patient_history_is_rejected() {
        assert!(validate_patient_history("").is_err());
        assert!(validate_patient_history("   ").is_err());
    }

    #[test]
    fn challenge_at_cap_is_accepted_one_over_is_rejected() {
        let at_cap = "a".repeat(MAX_USER_CHALLENGE_CHARS);
        assert!(validate_user_challenge(&at_cap).is_ok());
        let over_cap = "a".repeat(MAX_USER_CHALLENGE_CHARS + 1);
        assert!(validate_user_challenge(&over_cap).is_err());
    }
}
