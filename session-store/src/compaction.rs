//! Post-turn compaction: keeps a `ClinicalState`'s serialized size under the
//! configured cap. Applied after every successful turn, never mid-turn —
//! the orchestrator only sees a session after compaction has already run.

use common::clinical::{ClinicalState, FULL_ROUNDS_KEPT, MAX_KEY_FINDINGS};

const MAX_EVIDENCE_ITEMS: usize = 2;
const MAX_EPISODE_SUMMARIES: usize = 8;
const EPISODE_SUMMARY_MAX_CHARS: usize = 1024;

/// Folds rounds older than the last `FULL_ROUNDS_KEPT` into a single episode
/// summary string, truncates evidence arrays, and bounds `key_findings` to
/// the most recent entries. Idempotent: running it twice in a row is a
/// no-op the second time.
pub fn compact_if_needed(state: &mut ClinicalState, max_serialized_bytes: usize) {
    if state.serialized_size_bytes() <= max_serialized_bytes {
        return;
    }

    fold_old_rounds(state);
    truncate_evidence(state);
    bound_key_findings(state);

    if state.serialized_size_bytes() > max_serialized_bytes {
        state.episode_summaries.truncate(MAX_EPISODE_SUMMARIES);
    }
}

fn fold_old_rounds(state: &mut ClinicalState) {
    if state.rounds.len() <= FULL_ROUNDS_KEPT {
        return;
    }
    let overflow = state.rounds.len() - FULL_ROUNDS_KEPT;
    let old_rounds: Vec<_> = state.rounds.drain(0..overflow).collect();

    let mut summary = String::new();
    for round in &old_rounds {
        summary.push_str("challenge: ");
        summary.push_str(&truncate_chars(&round.user_challenge, 160));
        summary.push_str(" | delta: ");
        summary.push_str(&truncate_chars(&round.differential_delta, 160));
        summary.push(';');
    }
    state
        .episode_summaries
        .push(truncate_chars(&summary, EPISODE_SUMMARY_MAX_CHARS));
}

fn truncate_evidence(state: &mut ClinicalState) {
    for dx in &mut state.differential {
        dx.supporting_evidence.truncate(MAX_EVIDENCE_ITEMS);
        dx.against_evidence.truncate(MAX_EVIDENCE_ITEMS);
    }
}

fn bound_key_findings(state: &mut ClinicalState) {
    if state.key_findings.len() > MAX_KEY_FINDINGS {
        let overflow = state.key_findings.len() - MAX_KEY_FINDINGS;
        state.key_findings.drain(0..overflow);
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::clinical::{Diagnosis, DebateRound};

    fn big_state() -> ClinicalState {
        let mut state = ClinicalState::new("s1".to_string());
        for i in 0..10 {
            state.rounds.push(DebateRound {
                user_challenge: format!("challenge {i}: {}", "x".repeat(200)),
                ai_response: "y".repeat(500),
                citations: vec![],
                differential_delta: format!("delta {i}"),
            });
        }
        for i in 0..30 {
            state.key_findings.push(format!("finding {i}"));
        }
        state.differential.push(Diagnosis {
            name: "melanoma".to_string(),
            supporting_evidence: vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
            ..Default::default()
        });
        state
    }

    #[test]
    fn compacts_rounds_findings_and_evidence_when_over_cap() {
        let mut state = big_state();
        let before = state.serialized_size_bytes();
        compact_if_needed(&mut state, 512);
        assert!(state.serialized_size_bytes() < before);
        assert!(state.rounds.len() <= FULL_ROUNDS_KEPT);
        assert!(!state.episode_summaries.is_empty());
        assert!(state.key_findings.len() <= MAX_KEY_FINDINGS);
        assert!(state.differential[0].supporting_evidence.len() <= MAX_EVIDENCE_ITEMS);
    }

    #[test]
    fn under_cap_is_a_no_op() {
        let mut state = ClinicalState::new("s1".to_string());
        state.key_findings.push("one finding".to_string());
        let before = state.serialized_size_bytes();
        compact_if_needed(&mut state, 1024 * 1024);
        assert_eq!(state.serialized_size_bytes(), before);
    }
}
