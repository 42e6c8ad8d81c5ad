//! The debate-turn orchestrator. Drives one turn of the dual-model
//! protocol against a session's `ClinicalState`, selecting between
//! `OrchestratedExecutor` and `SpecialistOnlyExecutor` at the point of
//! failure rather than a fixed startup capability flag — an
//! `ORCHESTRATOR_UNAVAILABLE` failure degrades that single turn, not the
//! whole session.

mod client;
mod context;
mod executor;
mod formulate;
mod state;
mod synthesis;

pub use client::{OpenAiOrchestratorTransport, OrchestratorTransport};
pub use context::TurnOutcome;
pub use executor::{DebateExecutor, OrchestratedExecutor, SpecialistOnlyExecutor};
pub use synthesis::SynthesisOutput;

use common::clinical::{Citation, DebateRound, Diagnosis};
use common::error::AppError;
use session_store::SessionStore;
use tracing::warn;

/// The `/debate-turn` response shape.
#[derive(Debug, Clone)]
pub struct DebateTurnResponse {
    pub session_id: String,
    pub ai_response: String,
    pub updated_differential: Vec<Diagnosis>,
    pub citations: Vec<Citation>,
    pub has_guidelines: bool,
    pub rag_used: bool,
    pub orchestrated: bool,
    pub validation_warnings: Vec<String>,
    pub suggested_test: Option<String>,
}

fn describe_differential_delta(before: &[Diagnosis], after: &[Diagnosis]) -> String {
    let before_names: std::collections::HashSet<&str> = before.iter().map(|d| d.name.as_str()).collect();
    let after_names: std::collections::HashSet<&str> = after.iter().map(|d| d.name.as_str()).collect();

    let added: Vec<&str> = after_names.difference(&before_names).copied().collect();
    let removed: Vec<&str> = before_names.difference(&after_names).copied().collect();

    if added.is_empty() && removed.is_empty() {
        return "no change".to_string();
    }
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("added: {}", added.join(", ")));
    }
    if !removed.is_empty() {
        parts.push(format!("removed: {}", removed.join(", ")));
    }
    parts.join("; ")
}

/// Runs one debate turn end-to-end: resolves the session, holds its lock
/// for the whole turn, tries the orchestrated path and falls back to the
/// specialist-only path on `ORCHESTRATOR_UNAVAILABLE`, then writes the
/// outcome back into the session's state.
pub async fn run_debate_turn(
    store: &SessionStore,
    session_id: &str,
    user_challenge: String,
    image_png_bytes: Option<Vec<u8>>,
    orchestrated: &dyn DebateExecutor,
    specialist_only: &dyn DebateExecutor,
) -> Result<DebateTurnResponse, AppError> {
    let entry = store
        .get(session_id)
        .ok_or_else(|| AppError::NotFound("unknown session".to_string()))?;
    let mut guard = entry.try_lock()?;

    let before_differential = guard.differential.clone();

    let outcome = match orchestrated.execute_turn(&guard, user_challenge.clone(), image_png_bytes.clone()).await {
        Ok(outcome) => outcome,
        Err(AppError::OrchestratorUnavailable(detail)) => {
            warn!(session_id, error = %detail, "orchestrator unavailable; degrading this turn to specialist-only");
            specialist_only.execute_turn(&guard, user_challenge.clone(), image_png_bytes).await?
        }
        Err(err) => return Err(err),
    };

    let differential_delta = describe_differential_delta(&before_differential, &outcome.updated_differential);

    guard.rounds.push(DebateRound {
        user_challenge,
        ai_response: outcome.ai_response.clone(),
        citations: outcome.citations.clone(),
        differential_delta,
    });
    guard.differential = outcome.updated_differential.clone();
    guard.key_findings.extend(outcome.key_findings_update.clone());
    guard.ruled_out.extend(outcome.ruled_out_update.clone());
    guard.debate_round += 1;
    guard.updated_at = chrono::Utc::now();
    guard.enforce_invariants();

    session_store::compaction::compact_if_needed(&mut guard, store.max_serialized_bytes());

    Ok(DebateTurnResponse {
        session_id: session_id.to_string(),
        ai_response: outcome.ai_response,
        updated_differential: guard.differential.clone(),
        citations: outcome.citations,
        has_guidelines: outcome.has_guidelines,
        rag_used: outcome.rag_used,
        orchestrated: outcome.orchestrated,
        validation_warnings: outcome.validation_warnings,
        suggested_test: outcome.suggested_test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::clinical::Diagnosis;

    #[test]
    fn describe_differential_delta_reports_additions_and_removals() {
        let before = vec![Diagnosis {
            name: "viral pharyngitis".to_string(),
            ..Default::default()
        }];
        let after = vec![Diagnosis {
            name: "strep throat".to_string(),
            ..Default::default()
        }];
        let delta = describe_differential_delta(&before, &after);
        assert!(delta.contains("added: strep throat"));
        assert!(delta.contains("removed: viral pharyngitis"));
    }

    #[test]
    fn describe_differential_delta_reports_no_change() {
        let dx = vec![Diagnosis {
            name: "pericarditis".to_string(),
            ..Default::default()
        }];
        assert_eq!(describe_differential_delta(&dx, &dx), "no change");
    }
}
