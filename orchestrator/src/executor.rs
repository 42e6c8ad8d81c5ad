//! The dual-model `DebateExecutor`: one interface, two implementations,
//! selected by a runtime capability check
//! rather than scattered `if orchestrator_available` branches. Both drive
//! the same typestate machine (`crate::state`) through the debate turn's
//! stages; they differ only in whether an orchestrator-model call
//! formulates the specialist question and performs synthesis, or whether
//! the specialist is asked to produce the synthesis shape directly.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use common::clinical::{ClinicalState, GuidelineChunk};
use common::config::SpecialistConfig;
use common::counters::Counters;
use common::embedding::EmbeddingProvider;
use common::error::AppError;
use common::vector_store::VectorStore;
use hallucination_validator::{allowed_lab_names, build_allowed_values, validate, ValidationResult};
use retrieval_pipeline::{retrieve, QueryCache, RetrievalTuning};
use specialist_invoker::{invoke, InvokeOptions, PromptMaterial, RagChunkMaterial, SpecialistTransport, TaskKind};
use state_machines::core::GuardError;
use tracing::warn;

use crate::client::OrchestratorTransport;
use crate::context::TurnOutcome;
use crate::formulate::{formulate, FormulationDecision};
use crate::synthesis::{parse_synthesis, SynthesisOutput};

const SYNTHESIZE_SYSTEM_PROMPT: &str = "You are the clinical debate orchestrator. Given the specialist's answer \
and any retrieved guideline excerpts, produce the turn's synthesized response as a single JSON object: \
{\"ai_response\": string, \"updated_differential\": [{\"name\": string, \"probability\": \"high\"|\"medium\"|\"low\", \
\"supporting_evidence\": string[], \"against_evidence\": string[], \"suggested_tests\": string[]}], \
\"key_findings_update\": string[], \"ruled_out_update\": [{\"diagnosis\": string, \"reason\": string}], \
\"suggested_test\": string|null, \"raw_citations\": [{\"organization\": string|null, \"text\": string, \"url\": \
string|null, \"doc_id\": string|null}]}. Cite guidelines only when the retrieved excerpts support it. Output \
JSON only.";
const SYNTHESIZE_TEMPERATURE: f32 = 0.6;
const SYNTHESIZE_MAX_OUTPUT_TOKENS: u32 = 900;

const SPECIALIST_ONLY_JSON_INSTRUCTION: &str = "\n\nRespond with a single JSON object only, no prose outside \
it, matching exactly: {\"ai_response\": string, \"updated_differential\": [{\"name\": string, \"probability\": \
\"high\"|\"medium\"|\"low\", \"supporting_evidence\": string[], \"against_evidence\": string[], \
\"suggested_tests\": string[]}], \"key_findings_update\": string[], \"ruled_out_update\": [{\"diagnosis\": \
string, \"reason\": string}], \"suggested_test\": string|null, \"raw_citations\": [{\"organization\": \
string|null, \"text\": string, \"url\": string|null, \"doc_id\": string|null}]}.";

const DEFAULT_RETRIEVAL_TOP_K: usize = 4;

/// One side of the dual-model debate-turn protocol.
#[async_trait]
pub trait DebateExecutor: Send + Sync {
    async fn execute_turn(
        &self,
        state: &ClinicalState,
        user_challenge: String,
        image_png_bytes: Option<Vec<u8>>,
    ) -> Result<TurnOutcome, AppError>;
}

/// Calls the specialist, validates its answer against the session's
/// user-supplied data, and — on a failed validation — issues exactly one
/// corrective re-call before proceeding regardless. Returns the final
/// specialist text plus any
/// `validation_warnings` the endpoint should surface.
async fn specialist_call_with_validation_loop(
    transport: &dyn SpecialistTransport,
    config: &SpecialistConfig,
    state: &ClinicalState,
    material: PromptMaterial,
    task_kind: TaskKind,
    image_png_bytes: Option<Vec<u8>>,
) -> Result<(String, Vec<String>), AppError> {
    let allowed_values = build_allowed_values(state);
    let allowed_names = allowed_lab_names(state);

    let first = invoke(
        transport,
        config,
        material.clone(),
        InvokeOptions {
            task_kind,
            requested_max_output_tokens: config.context_limit / 4,
            image_png_bytes: image_png_bytes.clone(),
        },
    )
    .await?;

    let first_check: ValidationResult = validate(&first.text, &allowed_values, &allowed_names);
    if first_check.ok {
        return Ok((first.text, Vec::new()));
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
            requested_max_output_tokens: config.context_limit / 4,
            image_png_bytes,
        },
    )
    .await?;

    let second_check = validate(&second.text, &allowed_values, &allowed_names);
    if second_check.ok {
        return Ok((second.text, Vec::new()));
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
    Ok((second.text, warnings))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Internal(format!("invalid debate turn transition during {event}: {guard:?}"))
}

fn to_rag_chunk_material(chunks: &[GuidelineChunk]) -> Vec<RagChunkMaterial> {
    chunks
        .iter()
        .map(|c| RagChunkMaterial {
            organization: c.organization.clone(),
            text: c.chunk_text.clone(),
        })
        .collect()
}

fn synthesis_into_outcome(
    synthesis: SynthesisOutput,
    rag_chunks: &[GuidelineChunk],
    rag_used: bool,
    orchestrated: bool,
    validation_warnings: Vec<String>,
) -> TurnOutcome {
    let citations = citation_normalizer::normalize(synthesis.raw_citations, rag_chunks);
    let has_guidelines = citation_normalizer::has_guidelines(&citations);
    TurnOutcome {
        ai_response: synthesis.ai_response,
        updated_differential: synthesis.updated_differential,
        key_findings_update: synthesis.key_findings_update,
        ruled_out_update: synthesis.ruled_out_update,
        suggested_test: synthesis.suggested_test,
        citations,
        has_guidelines,
        rag_used,
        orchestrated,
        validation_warnings,
    }
}

/// The primary path: orchestrator formulates the specialist question,
/// decides on retrieval, and synthesizes the final response.
pub struct OrchestratedExecutor {
    pub orchestrator_transport: Arc<dyn OrchestratorTransport>,
    pub specialist_transport: Arc<dyn SpecialistTransport>,
    pub specialist_config: SpecialistConfig,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    pub query_cache: Arc<QueryCache>,
    pub retrieval_tuning: RetrievalTuning,
    pub index_chunks: Arc<Vec<GuidelineChunk>>,
    pub counters: Arc<Counters>,
}

impl OrchestratedExecutor {
    async fn retrieve_if_needed(&self, decision: &FormulationDecision) -> Result<(Vec<GuidelineChunk>, bool), AppError> {
        if !decision.needs_retrieval {
            return Ok((Vec::new(), false));
        }
        let query = if decision.retrieval_query.is_empty() {
            decision.specialist_question.clone()
        } else {
            decision.retrieval_query.clone()
        };
        let output = retrieve(
            query,
            DEFAULT_RETRIEVAL_TOP_K,
            decision.topic_hints.clone(),
            &self.retrieval_tuning,
            self.embedder.as_ref(),
            self.vector_store.as_ref(),
            &self.query_cache,
            &self.index_chunks,
        )
        .await?;
        if output.blocked {
            self.counters.rag_query_blocked_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok((output.chunks, !output.blocked))
    }
}

#[async_trait]
impl DebateExecutor for OrchestratedExecutor {
    async fn execute_turn(
        &self,
        state: &ClinicalState,
        user_challenge: String,
        image_png_bytes: Option<Vec<u8>>,
    ) -> Result<TurnOutcome, AppError> {
        let machine = crate::state::ready();
        let machine = machine
            .receive_challenge()
            .map_err(|(_, guard)| map_guard_error("receive_challenge", &guard))?;

        let decision = formulate(self.orchestrator_transport.as_ref(), state, &user_challenge).await?;

        let machine = if decision.needs_retrieval {
            machine
                .needs_retrieval()
                .map_err(|(_, guard)| map_guard_error("needs_retrieval", &guard))?
        } else {
            return self.run_without_retrieval(machine, state, user_challenge, image_png_bytes, decision).await;
        };

        let (rag_chunks, rag_used) = self.retrieve_if_needed(&decision).await?;
        let _machine = machine
            .retrieved()
            .map_err(|(_, guard)| map_guard_error("retrieved", &guard))?;

        self.run_with_retrieval_result(state, user_challenge, image_png_bytes, decision, rag_chunks, rag_used)
            .await
    }
}

impl OrchestratedExecutor {
    /// Shared tail once the RETRIEVE? branch has resolved either way.
    #[allow(clippy::too_many_arguments)]
    async fn run_with_retrieval_result(
        &self,
        state: &ClinicalState,
        user_challenge: String,
        image_png_bytes: Option<Vec<u8>>,
        decision: FormulationDecision,
        rag_chunks: Vec<GuidelineChunk>,
        rag_used: bool,
    ) -> Result<TurnOutcome, AppError> {
        let material = PromptMaterial::from_state(state, decision.specialist_question.clone(), to_rag_chunk_material(&rag_chunks));

        let (specialist_text, validation_warnings) = specialist_call_with_validation_loop(
            self.specialist_transport.as_ref(),
            &self.specialist_config,
            state,
            material,
            TaskKind::DebateSynthesisOrchestrated,
            image_png_bytes,
        )
        .await?;

        let synthesis_prompt = build_synthesis_prompt(&user_challenge, &specialist_text, &rag_chunks);
        let raw_synthesis = self
            .orchestrator_transport
            .complete(SYNTHESIZE_SYSTEM_PROMPT, &synthesis_prompt, SYNTHESIZE_TEMPERATURE, SYNTHESIZE_MAX_OUTPUT_TOKENS)
            .await
            .map_err(|err| AppError::OrchestratorUnavailable(err.to_string()))?;
        let synthesis = parse_synthesis(&raw_synthesis)?;

        Ok(synthesis_into_outcome(synthesis, &rag_chunks, rag_used, true, validation_warnings))
    }

    async fn run_without_retrieval(
        &self,
        machine: crate::state::DebateTurnMachine<(), crate::state::Formulate>,
        state: &ClinicalState,
        user_challenge: String,
        image_png_bytes: Option<Vec<u8>>,
        decision: FormulationDecision,
    ) -> Result<TurnOutcome, AppError> {
        let _machine = machine
            .skip_retrieval()
            .map_err(|(_, guard)| map_guard_error("skip_retrieval", &guard))?;

        self.run_with_retrieval_result(state, user_challenge, image_png_bytes, decision, Vec::new(), false)
            .await
    }
}

fn build_synthesis_prompt(user_challenge: &str, specialist_text: &str, rag_chunks: &[GuidelineChunk]) -> String {
    let mut out = String::new();
    out.push_str("USER CHALLENGE:\n");
    out.push_str(user_challenge);
    out.push_str("\n\nSPECIALIST ANSWER:\n");
    out.push_str(specialist_text);
    if !rag_chunks.is_empty() {
        out.push_str("\n\nRETRIEVED GUIDELINE EXCERPTS:\n");
        for chunk in rag_chunks {
            out.push_str(&format!("[{}] {}\n", chunk.organization, chunk.chunk_text));
        }
    }
    out
}

/// The degraded path: no orchestrator model available, so the specialist
/// is asked to produce the synthesis shape directly. The response shape
/// is identical; `orchestrated: false` is set by the caller.
pub struct SpecialistOnlyExecutor {
    pub specialist_transport: Arc<dyn SpecialistTransport>,
    pub specialist_config: SpecialistConfig,
}

#[async_trait]
impl DebateExecutor for SpecialistOnlyExecutor {
    async fn execute_turn(
        &self,
        state: &ClinicalState,
        user_challenge: String,
        image_png_bytes: Option<Vec<u8>>,
    ) -> Result<TurnOutcome, AppError> {
        let machine = crate::state::ready();
        let machine = machine
            .receive_challenge()
            .map_err(|(_, guard)| map_guard_error("receive_challenge", &guard))?;
        let _machine = machine
            .skip_retrieval()
            .map_err(|(_, guard)| map_guard_error("skip_retrieval", &guard))?;

        let schema_hinted_challenge = format!("{user_challenge}{SPECIALIST_ONLY_JSON_INSTRUCTION}");
        let material = PromptMaterial::from_state(state, schema_hinted_challenge, Vec::new());

        let (raw_text, validation_warnings) = specialist_call_with_validation_loop(
            self.specialist_transport.as_ref(),
            &self.specialist_config,
            state,
            material,
            TaskKind::DebateSynthesisSpecialistOnly,
            image_png_bytes,
        )
        .await?;

        let synthesis = parse_synthesis(&raw_text)?;
        Ok(synthesis_into_outcome(synthesis, &[], false, false, validation_warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as _async_trait;
    use common::clinical::ClinicalState;
    use specialist_invoker::DispatchError;
    use std::sync::Mutex as StdMutex;

    struct ScriptedSpecialistTransport {
        responses: StdMutex<Vec<Result<String, DispatchError>>>,
    }

    #[_async_trait]
    impl SpecialistTransport for ScriptedSpecialistTransport {
        async fn dispatch(&self, _request: specialist_invoker::DispatchRequest<'_>) -> Result<String, DispatchError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(DispatchError::Transport("no more scripted responses".to_string()));
            }
            responses.remove(0)
        }
    }

    struct ScriptedOrchestratorTransport {
        responses: StdMutex<Vec<Result<String, AppError>>>,
    }

    #[_async_trait]
    impl OrchestratorTransport for ScriptedOrchestratorTransport {
        async fn complete(&self, _system: &str, _user: &str, _temperature: f32, _max_tokens: u32) -> Result<String, AppError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(AppError::OrchestratorUnavailable("scripted exhausted".to_string()));
            }
            responses.remove(0)
        }
    }

    fn test_specialist_config() -> SpecialistConfig {
        SpecialistConfig {
            base_url: "http://localhost".to_string(),
            api_key: "test".to_string(),
            model: "test-model".to_string(),
            context_limit: 32_000,
            per_attempt_timeout_secs: 90,
            total_budget_timeout_secs: 180,
            min_substantive_chars: 50,
        }
    }

    #[tokio::test]
    async fn specialist_only_executor_parses_direct_synthesis_json() {
        let state = ClinicalState::new("s1".to_string());
        let json = r#"{"ai_response": "Findings support viral pericarditis over MI.", "updated_differential": [{"name": "viral pericarditis", "probability": "high"}], "raw_citations": []}"#;
        let transport = ScriptedSpecialistTransport {
            responses: StdMutex::new(vec![Ok(json.to_string())]),
        };
        let executor = SpecialistOnlyExecutor {
            specialist_transport: Arc::new(transport),
            specialist_config: test_specialist_config(),
        };

        let outcome = executor
            .execute_turn(&state, "could this be pericarditis?".to_string(), None)
            .await
            .unwrap();

        assert!(outcome.ai_response.contains("pericarditis"));
        assert!(!outcome.orchestrated);
        assert!(outcome.citations.is_empty());
        assert!(!outcome.has_guidelines);
    }

    #[tokio::test]
    async fn orchestrated_executor_skips_retrieval_when_formulation_says_not_needed() {
        let state = ClinicalState::new("s1".to_string());
        let formulation = r#"{"specialist_question": "Evaluate for viral pericarditis.", "needs_retrieval": false}"#;
        let synthesis = r#"{"ai_response": "Viral pericarditis remains favored.", "updated_differential": [], "raw_citations": []}"#;

        let orchestrator_transport = ScriptedOrchestratorTransport {
            responses: StdMutex::new(vec![Ok(formulation.to_string()), Ok(synthesis.to_string())]),
        };
        let specialist_transport = ScriptedSpecialistTransport {
            responses: StdMutex::new(vec![Ok("substantive analysis of the clinical picture presented here".to_string())]),
        };

        let executor = OrchestratedExecutor {
            orchestrator_transport: Arc::new(orchestrator_transport),
            specialist_transport: Arc::new(specialist_transport),
            specialist_config: test_specialist_config(),
            embedder: Arc::new(common::embedding::HashedEmbeddingProvider::new(16)),
            vector_store: Arc::new(common::vector_store::BruteForceIndex::new()),
            query_cache: Arc::new(QueryCache::new(std::time::Duration::from_secs(900), 256)),
            retrieval_tuning: RetrievalTuning::default(),
            index_chunks: Arc::new(Vec::new()),
            counters: Arc::new(Counters::new()),
        };

        let outcome = executor
            .execute_turn(&state, "could this be pericarditis?".to_string(), None)
            .await
            .unwrap();

        assert!(outcome.orchestrated);
        assert!(!outcome.rag_used);
        assert!(outcome.ai_response.contains("pericarditis"));
    }

    #[tokio::test]
    async fn over_long_retrieval_query_increments_blocked_counter_and_skips_rag() {
        let state = ClinicalState::new("s1".to_string());
        let long_query = "x".repeat(600);
        let formulation = serde_json::json!({
            "specialist_question": "Evaluate for viral pericarditis.",
            "needs_retrieval": true,
            "retrieval_query": long_query,
        })
        .to_string();
        let synthesis = r#"{"ai_response": "Viral pericarditis remains favored.", "updated_differential": [], "raw_citations": []}"#;

        let orchestrator_transport = ScriptedOrchestratorTransport {
            responses: StdMutex::new(vec![Ok(formulation), Ok(synthesis.to_string())]),
        };
        let specialist_transport = ScriptedSpecialistTransport {
            responses: StdMutex::new(vec![Ok("substantive analysis of the clinical picture presented here".to_string())]),
        };

        let counters = Arc::new(Counters::new());
        let executor = OrchestratedExecutor {
            orchestrator_transport: Arc::new(orchestrator_transport),
            specialist_transport: Arc::new(specialist_transport),
            specialist_config: test_specialist_config(),
            embedder: Arc::new(common::embedding::HashedEmbeddingProvider::new(16)),
            vector_store: Arc::new(common::vector_store::BruteForceIndex::new()),
            query_cache: Arc::new(QueryCache::new(std::time::Duration::from_secs(900), 256)),
            retrieval_tuning: RetrievalTuning::default(),
            index_chunks: Arc::new(Vec::new()),
            counters: counters.clone(),
        };

        let outcome = executor
            .execute_turn(&state, "could this be pericarditis?".to_string(), None)
            .await
            .unwrap();

        assert!(!outcome.rag_used);
        assert!(outcome.citations.is_empty());
        assert_eq!(counters.rag_query_blocked_count.load(Ordering::Relaxed), 1);
    }
}
