//! The domain-specialist invoker: renders `PromptMaterial` into
//! a prompt, dispatches it to the specialist vision-language model with a
//! token-budget pre-clamp, retries on overflow/transport failures, and
//! recovers from pure refusals on image tasks before handing the caller
//! a stripped, substantive response.

pub mod budget;
pub mod client;
pub mod compaction;
pub mod image;
pub mod refusal;
pub mod temperature;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::config::SpecialistConfig;
use common::error::AppError;

pub use client::{DispatchError, DispatchRequest, OpenAiSpecialistTransport, SpecialistTransport};
pub use compaction::{PromptMaterial, RagChunkMaterial, RoundMaterial};

const SYSTEM_PROMPT: &str = "You are a clinical differential-diagnosis specialist. Reason from the findings and evidence provided. Do not refuse to engage with the clinical scenario; if an image is attached it has already been screened for safety. Respond directly and substantively.";

const REFRAMED_IMAGE_PROMPT_PREFIX: &str = "Describe only the objective visual findings in this image — color, shape, border, size, texture, distribution. Do not diagnose. Do not decline to describe.";

/// What kind of turn is being dispatched; selects the temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    ImageAnalysis,
    StructuredJson,
    DebateSynthesisSpecialistOnly,
    DebateSynthesisOrchestrated,
}

impl TaskKind {
    fn temperature(self) -> f32 {
        match self {
            TaskKind::ImageAnalysis => temperature::IMAGE_ANALYSIS,
            TaskKind::StructuredJson => temperature::STRUCTURED_JSON,
            TaskKind::DebateSynthesisSpecialistOnly => temperature::DEBATE_SYNTHESIS_SPECIALIST_ONLY,
            TaskKind::DebateSynthesisOrchestrated => temperature::DEBATE_SYNTHESIS_ORCHESTRATED,
        }
    }

    fn is_image_task(self) -> bool {
        matches!(self, TaskKind::ImageAnalysis)
    }
}

/// Per-call dispatch options.
pub struct InvokeOptions {
    pub task_kind: TaskKind,
    pub requested_max_output_tokens: u32,
    pub image_png_bytes: Option<Vec<u8>>,
}

/// The specialist's response after refusal recovery and preamble
/// stripping have already been applied.
#[derive(Debug, Clone)]
pub struct SpecialistResponse {
    pub text: String,
    pub refusal_recovered: bool,
    pub compaction_applied: bool,
}

/// Renders `material` into a single user-facing prompt string. Kept
/// simple and explicit rather than templated — plain `format!`-based
/// prompt assembly.
fn render_prompt(material: &PromptMaterial) -> String {
    let mut out = String::new();
    out.push_str("PATIENT HISTORY:\n");
    out.push_str(&material.patient_history);
    out.push_str("\n\nKEY FINDINGS:\n");
    for finding in &material.key_findings {
        out.push_str("- ");
        out.push_str(finding);
        out.push('\n');
    }
    out.push_str("\nCURRENT DIFFERENTIAL:\n");
    for dx in &material.differential {
        out.push_str(&format!("- {} ({:?})\n", dx.name, dx.probability));
    }
    if !material.rounds.is_empty() {
        out.push_str("\nPRIOR DEBATE ROUNDS:\n");
        for round in &material.rounds {
            out.push_str(&format!("Q: {}\nA: {}\n", round.user_challenge, round.ai_response));
        }
    }
    if let Some(image_ctx) = &material.image_context {
        out.push_str("\nIMAGE CONTEXT:\n");
        out.push_str(image_ctx);
        out.push('\n');
    }
    if !material.rag_chunks.is_empty() {
        out.push_str("\nRETRIEVED GUIDELINE EXCERPTS:\n");
        for chunk in &material.rag_chunks {
            out.push_str(&format!("[{}] {}\n", chunk.organization, chunk.text));
        }
    }
    out.push_str("\nCHALLENGE:\n");
    out.push_str(&material.user_challenge);
    out
}

/// Runs the full invoke pipeline: budget pre-clamp, dispatch, one
/// overflow-aware retry (reducing output budget on a `max_tokens`
/// overflow, or applying prompt compaction on an input-tokens overflow),
/// one backoff retry on a timeout or other transport error, and — for
/// image tasks only — a single reframed, colder retry if the first
/// response is a pure refusal. The whole dispatch-and-retry sequence is
/// bounded by `total_budget_timeout_secs`, on top of the per-attempt
/// timeout each individual dispatch already enforces.
pub async fn invoke(
    transport: &dyn SpecialistTransport,
    config: &SpecialistConfig,
    mut material: PromptMaterial,
    options: InvokeOptions,
) -> Result<SpecialistResponse, AppError> {
    let has_image = options.image_png_bytes.is_some();
    let image_b64 = options
        .image_png_bytes
        .as_deref()
        .map(image::downscale_if_needed)
        .transpose()?
        .map(|bytes| STANDARD.encode(bytes));

    let mut prompt = render_prompt(&material);
    let mut compaction_applied = false;
    let input_estimate = budget::estimate_input_tokens(&prompt, has_image);
    let mut max_output_tokens = budget::clamp_max_output_tokens(
        input_estimate,
        options.requested_max_output_tokens,
        config.context_limit,
    );

    let dispatch_sequence = async {
        let first_attempt = dispatch_once(
            transport,
            &prompt,
            image_b64.as_deref(),
            options.task_kind.temperature(),
            max_output_tokens,
        )
        .await;

        match first_attempt {
            Ok(text) => Ok(text),
            Err(DispatchError::MaxTokensOverflow) => {
                max_output_tokens = budget::reduce_for_overflow(max_output_tokens);
                dispatch_once(
                    transport,
                    &prompt,
                    image_b64.as_deref(),
                    options.task_kind.temperature(),
                    max_output_tokens,
                )
                .await
                .map_err(AppError::from)
            }
            Err(DispatchError::InputTokensOverflow) => {
                material.compact();
                compaction_applied = true;
                prompt = render_prompt(&material);
                dispatch_once(
                    transport,
                    &prompt,
                    image_b64.as_deref(),
                    options.task_kind.temperature(),
                    max_output_tokens,
                )
                .await
                .map_err(AppError::from)
            }
            Err(DispatchError::Timeout) => {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                dispatch_once(
                    transport,
                    &prompt,
                    image_b64.as_deref(),
                    options.task_kind.temperature(),
                    max_output_tokens,
                )
                .await
                .map_err(|_| AppError::SpecialistTimeout)
            }
            Err(DispatchError::Transport(detail)) => {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                dispatch_once(
                    transport,
                    &prompt,
                    image_b64.as_deref(),
                    options.task_kind.temperature(),
                    max_output_tokens,
                )
                .await
                .map_err(|_| AppError::SpecialistTransport(detail))
            }
        }
    };

    let text = tokio::time::timeout(std::time::Duration::from_secs(config.total_budget_timeout_secs), dispatch_sequence)
        .await
        .map_err(|_| AppError::SpecialistTimeout)??;

    let (final_text, refusal_recovered) = if options.task_kind.is_image_task()
        && refusal::is_pure_refusal(&text, config.min_substantive_chars)
    {
        let reframed_prompt = format!("{REFRAMED_IMAGE_PROMPT_PREFIX}\n\n{prompt}");
        match dispatch_once(
            transport,
            &reframed_prompt,
            image_b64.as_deref(),
            temperature::REFUSAL_RETRY,
            max_output_tokens,
        )
        .await
        {
            Ok(retry_text) if !refusal::is_pure_refusal(&retry_text, config.min_substantive_chars) => {
                (retry_text, true)
            }
            _ => (text, false),
        }
    } else {
        (text, false)
    };

    let stripped = refusal::strip_preamble(&final_text).to_string();

    Ok(SpecialistResponse {
        text: stripped,
        refusal_recovered,
        compaction_applied,
    })
}

async fn dispatch_once(
    transport: &dyn SpecialistTransport,
    prompt: &str,
    image_b64: Option<&str>,
    temperature: f32,
    max_output_tokens: u32,
) -> Result<String, DispatchError> {
    transport
        .dispatch(DispatchRequest {
            system_prompt: SYSTEM_PROMPT,
            user_prompt: prompt,
            image_base64_png: image_b64,
            temperature,
            max_output_tokens,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<Vec<Result<String, DispatchError>>>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl SpecialistTransport for ScriptedTransport {
        async fn dispatch(&self, _request: DispatchRequest<'_>) -> Result<String, DispatchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(DispatchError::Transport("no more scripted responses".to_string()));
            }
            responses.remove(0)
        }
    }

    fn test_config() -> SpecialistConfig {
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

    fn empty_material() -> PromptMaterial {
        PromptMaterial {
            patient_history: "healthy adult".to_string(),
            differential: vec![],
            key_findings: vec![],
            rounds: vec![],
            image_context: None,
            rag_chunks: vec![],
            user_challenge: "what else could this be?".to_string(),
            existing_citations: vec![],
        }
    }

    #[tokio::test]
    async fn successful_first_attempt_passes_through() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![Ok("a substantive clinical analysis of the findings presented here in detail".to_string())]),
            call_count: AtomicUsize::new(0),
        };
        let result = invoke(
            &transport,
            &test_config(),
            empty_material(),
            InvokeOptions {
                task_kind: TaskKind::DebateSynthesisSpecialistOnly,
                requested_max_output_tokens: 1000,
                image_png_bytes: None,
            },
        )
        .await
        .unwrap();
        assert!(result.text.contains("substantive"));
        assert!(!result.refusal_recovered);
        assert!(!result.compaction_applied);
    }

    #[tokio::test]
    async fn max_tokens_overflow_retries_with_reduced_budget() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![
                Err(DispatchError::MaxTokensOverflow),
                Ok("reduced-budget response with enough substance to pass the refusal check easily".to_string()),
            ]),
            call_count: AtomicUsize::new(0),
        };
        let result = invoke(
            &transport,
            &test_config(),
            empty_material(),
            InvokeOptions {
                task_kind: TaskKind::StructuredJson,
                requested_max_output_tokens: 1000,
                image_png_bytes: None,
            },
        )
        .await
        .unwrap();
        assert!(result.text.contains("reduced-budget"));
        assert_eq!(transport.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn image_task_pure_refusal_triggers_reframed_retry() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![
                Ok("I am unable to provide a diagnosis.".to_string()),
                Ok("The lesion is roughly 8mm, irregular border, asymmetric pigmentation with variable coloration.".to_string()),
            ]),
            call_count: AtomicUsize::new(0),
        };
        let mut material = empty_material();
        material.image_context = Some("dermoscopy image".to_string());
        let result = invoke(
            &transport,
            &test_config(),
            material,
            InvokeOptions {
                task_kind: TaskKind::ImageAnalysis,
                requested_max_output_tokens: 1000,
                image_png_bytes: Some(vec![0u8; 10]),
            },
        )
        .await
        .unwrap();
        assert!(result.refusal_recovered);
        assert!(result.text.contains("irregular border"));
    }

    #[tokio::test]
    async fn timeout_is_retried_once_then_succeeds() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![
                Err(DispatchError::Timeout),
                Ok("substantive analysis recovered after a single retried dispatch attempt".to_string()),
            ]),
            call_count: AtomicUsize::new(0),
        };
        let result = invoke(
            &transport,
            &test_config(),
            empty_material(),
            InvokeOptions {
                task_kind: TaskKind::DebateSynthesisSpecialistOnly,
                requested_max_output_tokens: 1000,
                image_png_bytes: None,
            },
        )
        .await
        .unwrap();
        assert!(result.text.contains("recovered"));
        assert_eq!(transport.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_twice_in_a_row_is_a_hard_failure() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![Err(DispatchError::Timeout), Err(DispatchError::Timeout)]),
            call_count: AtomicUsize::new(0),
        };
        let result = invoke(
            &transport,
            &test_config(),
            empty_material(),
            InvokeOptions {
                task_kind: TaskKind::DebateSynthesisSpecialistOnly,
                requested_max_output_tokens: 1000,
                image_png_bytes: None,
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::SpecialistTimeout)));
        assert_eq!(transport.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_total_budget_surfaces_as_specialist_timeout() {
        struct StallingTransport;

        #[async_trait]
        impl SpecialistTransport for StallingTransport {
            async fn dispatch(&self, _request: DispatchRequest<'_>) -> Result<String, DispatchError> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok("never reached".to_string())
            }
        }

        tokio::time::pause();
        let mut config = test_config();
        config.total_budget_timeout_secs = 5;
        let transport = StallingTransport;

        let invoke_future = invoke(
            &transport,
            &config,
            empty_material(),
            InvokeOptions {
                task_kind: TaskKind::DebateSynthesisSpecialistOnly,
                requested_max_output_tokens: 1000,
                image_png_bytes: None,
            },
        );
        tokio::pin!(invoke_future);
        tokio::time::advance(std::time::Duration::from_secs(6)).await;
        let result = invoke_future.await;
        assert!(matches!(result, Err(AppError::SpecialistTimeout)));
    }

    #[tokio::test]
    async fn non_image_task_pure_refusal_is_passed_through_unrecovered() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![Ok("I am unable to assist.".to_string())]),
            call_count: AtomicUsize::new(0),
        };
        let result = invoke(
            &transport,
            &test_config(),
            empty_material(),
            InvokeOptions {
                task_kind: TaskKind::DebateSynthesisSpecialistOnly,
                requested_max_output_tokens: 1000,
                image_png_bytes: None,
            },
        )
        .await
        .unwrap();
        assert!(!result.refusal_recovered);
    }
}
