//! What each `DebateExecutor` produces for a turn, before it's written
//! back into the session's `ClinicalState`.

use common::clinical::{Citation, Diagnosis, RuledOut};

/// What `UPDATE_STATE` writes back into the session's `ClinicalState`,
/// plus everything the endpoint handler needs for the response body.
pub struct TurnOutcome {
    pub ai_response: String,
    pub updated_differential: Vec<Diagnosis>,
    pub key_findings_update: Vec<String>,
    pub ruled_out_update: Vec<RuledOut>,
    pub suggested_test: Option<String>,
    pub citations: Vec<Citation>,
    pub has_guidelines: bool,
    pub rag_used: bool,
    pub orchestrated: bool,
    pub validation_warnings: Vec<String>,
}
