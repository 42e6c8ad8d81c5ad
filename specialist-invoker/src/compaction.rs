//! `PromptMaterial`: the structured input the orchestrator hands to the
//! specialist invoker, plus the deterministic prompt-compaction reduction
//! steps applied when the pre-clamp budget still doesn't fit, run in a
//! fixed order.

use common::clinical::{Citation, ClinicalState, Diagnosis};

const MAX_ROUNDS_KEPT: usize = 2;
const PATIENT_HISTORY_HEAD_SENTENCES: usize = 3;
const PATIENT_HISTORY_TAIL_SENTENCES: usize = 2;
const MAX_EVIDENCE_ITEMS: usize = 2;
const IMAGE_CONTEXT_MAX_BYTES: usize = 1024;
const MAX_RAG_CHUNKS: usize = 4;
const RAG_CHUNK_MAX_BYTES: usize = 1200;

/// One retained debate round, compaction-eligible.
#[derive(Debug, Clone)]
pub struct RoundMaterial {
    pub user_challenge: String,
    pub ai_response: String,
}

/// One RAG chunk handed to the specialist as grounding context.
#[derive(Debug, Clone)]
pub struct RagChunkMaterial {
    pub organization: String,
    pub text: String,
}

/// Structured prompt material assembled by the orchestrator and rendered
/// into a single prompt string by the specialist invoker. Keeping this
/// structured (rather than a pre-rendered string) is what lets the
/// invoker apply its own compaction steps without the orchestrator
/// needing to know about them.
#[derive(Debug, Clone)]
pub struct PromptMaterial {
    pub patient_history: String,
    pub differential: Vec<Diagnosis>,
    pub key_findings: Vec<String>,
    pub rounds: Vec<RoundMaterial>,
    pub image_context: Option<String>,
    pub rag_chunks: Vec<RagChunkMaterial>,
    pub user_challenge: String,
    pub existing_citations: Vec<Citation>,
}

impl PromptMaterial {
    /// Builds prompt material from a session's clinical state plus the
    /// current turn's challenge and retrieved guideline chunks.
    pub fn from_state(
        state: &ClinicalState,
        user_challenge: String,
        rag_chunks: Vec<RagChunkMaterial>,
    ) -> Self {
        let rounds = state
            .rounds
            .iter()
            .map(|round| RoundMaterial {
                user_challenge: round.user_challenge.clone(),
                ai_response: round.ai_response.clone(),
            })
            .collect();
        let existing_citations = state
            .rounds
            .iter()
            .flat_map(|round| round.citations.clone())
            .collect();

        Self {
            patient_history: state.patient_history.clone(),
            differential: state.differential.clone(),
            key_findings: state.key_findings.clone(),
            rounds,
            image_context: state.image_context.clone(),
            rag_chunks,
            user_challenge,
            existing_citations,
        }
    }

    /// Applies the deterministic reduction steps in fixed order: (a) drop
    /// all but the most recent `MAX_ROUNDS_KEPT` rounds, (b) replace
    /// patient history with head/tail sentences plus a length marker, (c)
    /// trim evidence arrays, (d) cap image context, (e) cap and trim RAG
    /// chunks. Idempotent.
    pub fn compact(&mut self) {
        self.drop_old_rounds();
        self.compact_patient_history();
        self.trim_evidence();
        self.cap_image_context();
        self.cap_rag_chunks();
    }

    fn drop_old_rounds(&mut self) {
        if self.rounds.len() > MAX_ROUNDS_KEPT {
            let overflow = self.rounds.len() - MAX_ROUNDS_KEPT;
            self.rounds.drain(0..overflow);
        }
    }

    fn compact_patient_history(&mut self) {
        let sentences: Vec<&str> = self
            .patient_history
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if sentences.len() <= PATIENT_HISTORY_HEAD_SENTENCES + PATIENT_HISTORY_TAIL_SENTENCES {
            return;
        }

        let original_len = self.patient_history.chars().count();
        let head = sentences[..PATIENT_HISTORY_HEAD_SENTENCES].join(" ");
        let tail_start = sentences.len() - PATIENT_HISTORY_TAIL_SENTENCES;
        let tail = sentences[tail_start..].join(" ");
        self.patient_history = format!("{head} [...{original_len} chars omitted...] {tail}");
    }

    fn trim_evidence(&mut self) {
        for dx in &mut self.differential {
            dx.supporting_evidence.truncate(MAX_EVIDENCE_ITEMS);
            dx.against_evidence.truncate(MAX_EVIDENCE_ITEMS);
        }
    }

    fn cap_image_context(&mut self) {
        if let Some(ctx) = &mut self.image_context {
            truncate_to_byte_cap(ctx, IMAGE_CONTEXT_MAX_BYTES);
        }
    }

    fn cap_rag_chunks(&mut self) {
        self.rag_chunks.truncate(MAX_RAG_CHUNKS);
        for chunk in &mut self.rag_chunks {
            truncate_to_byte_cap(&mut chunk.text, RAG_CHUNK_MAX_BYTES);
        }
    }
}

fn truncate_to_byte_cap(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material_with_rounds(n: usize) -> PromptMaterial {
        PromptMaterial {
            patient_history: "a short history.".to_string(),
            differential: vec![],
            key_findings: vec![],
            rounds: (0..n)
                .map(|i| RoundMaterial {
                    user_challenge: format!("challenge {i}"),
                    ai_response: format!("response {i}"),
                })
                .collect(),
            image_context: None,
            rag_chunks: vec![],
            user_challenge: "what about PE?".to_string(),
            existing_citations: vec![],
        }
    }

    #[test]
    fn compact_drops_all_but_recent_rounds() {
        let mut material = material_with_rounds(5);
        material.compact();
        assert_eq!(material.rounds.len(), MAX_ROUNDS_KEPT);
        assert_eq!(material.rounds.last().unwrap().user_challenge, "challenge 4");
    }

    #[test]
    fn compact_replaces_long_patient_history_with_head_tail_marker() {
        let mut material = material_with_rounds(0);
        material.patient_history = (0..20)
            .map(|i| format!("Sentence number {i} with some detail."))
            .collect::<Vec<_>>()
            .join(" ");
        let original_len = material.patient_history.chars().count();
        material.compact();
        assert!(material.patient_history.contains("omitted"));
        assert!(material.patient_history.len() < original_len);
    }

    #[test]
    fn compact_trims_evidence_arrays() {
        let mut material = material_with_rounds(0);
        material.differential.push(Diagnosis {
            name: "pneumonia".to_string(),
            supporting_evidence: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            ..Default::default()
        });
        material.compact();
        assert!(material.differential[0].supporting_evidence.len() <= MAX_EVIDENCE_ITEMS);
    }

    #[test]
    fn compact_caps_image_context_and_rag_chunks() {
        let mut material = material_with_rounds(0);
        material.image_context = Some("x".repeat(5000));
        material.rag_chunks = (0..10)
            .map(|i| RagChunkMaterial {
                organization: format!("org{i}"),
                text: "y".repeat(5000),
            })
            .collect();
        material.compact();
        assert!(material.image_context.unwrap().len() <= IMAGE_CONTEXT_MAX_BYTES);
        assert!(material.rag_chunks.len() <= MAX_RAG_CHUNKS);
        assert!(material.rag_chunks.iter().all(|c| c.text.len() <= RAG_CHUNK_MAX_BYTES));
    }

    #[test]
    fn compact_is_idempotent() {
        let mut material = material_with_rounds(5);
        material.compact();
        let after_first = material.rounds.len();
        material.compact();
        assert_eq!(material.rounds.len(), after_first);
    }
}
