//! FORMULATE: the orchestrator produces a focused specialist question
//! from `(clinical_state.to_summary(), last 2 rounds, user_challenge)`
//! and decides whether retrieval is needed this turn.

use common::clinical::{ClinicalState, FULL_ROUNDS_KEPT};
use common::error::AppError;
use serde::Deserialize;

use crate::client::OrchestratorTransport;

const FORMULATE_SYSTEM_PROMPT: &str = "You are the clinical debate orchestrator. Given a case summary, the \
recent debate history, and the user's latest challenge, produce a focused question to put to the domain \
specialist model, and decide whether consulting clinical guideline excerpts would help answer it. Respond with \
a single JSON object: {\"specialist_question\": string, \"needs_retrieval\": boolean, \"retrieval_query\": \
string, \"topic_hints\": string[]}. Output JSON only.";

const FORMULATE_TEMPERATURE: f32 = 0.4;
const FORMULATE_MAX_OUTPUT_TOKENS: u32 = 400;

#[derive(Debug, Clone, Deserialize)]
pub struct FormulationDecision {
    pub specialist_question: String,
    #[serde(default)]
    pub needs_retrieval: bool,
    #[serde(default)]
    pub retrieval_query: String,
    #[serde(default)]
    pub topic_hints: Vec<String>,
}

fn build_formulation_prompt(state: &ClinicalState, user_challenge: &str) -> String {
    let mut out = String::new();
    out.push_str("CASE SUMMARY:\n");
    out.push_str(&state.to_summary());
    out.push_str("\n\nRECENT ROUNDS:\n");
    for round in state.rounds.iter().rev().take(FULL_ROUNDS_KEPT).rev() {
        out.push_str(&format!("Q: {}\nA: {}\n", round.user_challenge, round.ai_response));
    }
    out.push_str("\nUSER CHALLENGE:\n");
    out.push_str(user_challenge);
    out
}

/// Calls the orchestrator model to produce a `FormulationDecision`. A
/// transport failure here is the trigger for the whole turn to degrade to
/// the specialist-only path — callers treat any error from this function
/// as `ORCHESTRATOR_UNAVAILABLE`.
pub async fn formulate(
    transport: &dyn OrchestratorTransport,
    state: &ClinicalState,
    user_challenge: &str,
) -> Result<FormulationDecision, AppError> {
    let prompt = build_formulation_prompt(state, user_challenge);
    let raw = transport
        .complete(FORMULATE_SYSTEM_PROMPT, &prompt, FORMULATE_TEMPERATURE, FORMULATE_MAX_OUTPUT_TOKENS)
        .await
        .map_err(|err| AppError::OrchestratorUnavailable(err.to_string()))?;

    let value = json_stream_parser::repair::repair_and_parse(&raw)
        .map_err(|detail| AppError::OrchestratorUnavailable(format!("formulation output unparseable: {detail}")))?;
    serde_json::from_value(value)
        .map_err(|err| AppError::OrchestratorUnavailable(format!("formulation output did not match expected shape: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formulation_prompt_includes_summary_and_challenge() {
        let state = ClinicalState::new("s1".to_string());
        let prompt = build_formulation_prompt(&state, "could this be lupus?");
        assert!(prompt.contains("CASE SUMMARY"));
        assert!(prompt.contains("could this be lupus?"));
    }

    #[test]
    fn decodes_formulation_decision_json() {
        let raw = r#"{"specialist_question": "Assess for lupus given joint pain and fatigue.", "needs_retrieval": true, "retrieval_query": "lupus diagnostic criteria", "topic_hints": ["rheumatology"]}"#;
        let value: FormulationDecision = serde_json::from_str(raw).unwrap();
        assert!(value.needs_retrieval);
        assert_eq!(value.topic_hints, vec!["rheumatology".to_string()]);
    }
}
