//! The orchestrator's own conversational-LLM transport: a thin
//! `async-openai` wrapper used for the two "orchestrator-call" steps in
//! the state machine (FORMULATE's retrieval decision, SYNTHESIZE). Mirrors
//! `specialist-invoker/src/client.rs`'s shape, minus the image/overflow
//! handling the specialist invoker owns — a transport failure here simply
//! degrades the whole turn to the specialist-only path, so it is not
//! worth retrying internally.

use async_openai::config::OpenAIConfig;
use async_openai::types::CreateChatCompletionRequestArgs;
use async_trait::async_trait;
use common::config::OrchestratorConfig;
use common::error::AppError;

/// Abstraction over the orchestrator model transport so the debate-turn
/// driver can be tested against a scripted fake.
#[async_trait]
pub trait OrchestratorTransport: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String, AppError>;
}

pub struct OpenAiOrchestratorTransport {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOrchestratorTransport {
    pub fn new(config: &OrchestratorConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(config.base_url.clone())
            .with_api_key(config.api_key.clone());
        Self {
            client: async_openai::Client::with_config(openai_config),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl OrchestratorTransport for OpenAiOrchestratorTransport {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(temperature)
            .max_tokens(max_output_tokens)
            .messages(vec![
                async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()?
                    .into(),
                async_openai::types::ChatCompletionRequestUserMessageArgs::default()
                    .content(user_prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::OrchestratorUnavailable("orchestrator returned no choices".to_string()))?;

        choice
            .message
            .content
            .ok_or_else(|| AppError::OrchestratorUnavailable("orchestrator returned empty content".to_string()))
    }
}
