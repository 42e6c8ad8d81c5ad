//! Specialist transport: wraps the domain-specialist vision-language
//! model behind an `async-openai` chat-completions client, classifying
//! transport failures into the overflow/timeout/transport shape the
//! invoke loop retries on.

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_trait::async_trait;
use common::config::SpecialistConfig;
use common::error::AppError;

/// Distinguishes why a dispatch attempt failed, so the invoke loop can
/// pick the matching retry strategy.
#[derive(Debug)]
pub enum DispatchError {
    /// The serving layer rejected the request because `max_tokens` (the
    /// requested output budget) was too large for the remaining context.
    MaxTokensOverflow,
    /// The serving layer rejected the request because the input itself
    /// overflowed the context window.
    InputTokensOverflow,
    /// The request exceeded `per_attempt_timeout_secs`.
    Timeout,
    /// Any other transport-level failure (network, 5xx, malformed
    /// response) — eligible for a single backoff retry.
    Transport(String),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MaxTokensOverflow | DispatchError::InputTokensOverflow => {
                AppError::SpecialistOverflow("specialist context window exceeded".to_string())
            }
            DispatchError::Timeout => AppError::SpecialistTimeout,
            DispatchError::Transport(detail) => AppError::SpecialistTransport(detail),
        }
    }
}

/// One dispatch attempt's request shape, already budget-clamped by the
/// caller.
pub struct DispatchRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub image_base64_png: Option<&'a str>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Abstraction over the specialist model transport so the invoke loop
/// can be tested against a fake without a network endpoint.
#[async_trait]
pub trait SpecialistTransport: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest<'_>) -> Result<String, DispatchError>;
}

pub struct OpenAiSpecialistTransport {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
    per_attempt_timeout_secs: u64,
}

impl OpenAiSpecialistTransport {
    pub fn new(config: &SpecialistConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(config.base_url.clone())
            .with_api_key(config.api_key.clone());
        Self {
            client: async_openai::Client::with_config(openai_config),
            model: config.model.clone(),
            per_attempt_timeout_secs: config.per_attempt_timeout_secs,
        }
    }

    fn classify(err: &OpenAIError) -> DispatchError {
        let message = err.to_string().to_lowercase();
        if message.contains("context_length") || message.contains("context window") {
            if message.contains("max_tokens") || message.contains("max tokens") || message.contains("completion") {
                DispatchError::MaxTokensOverflow
            } else {
                DispatchError::InputTokensOverflow
            }
        } else if message.contains("timed out") || message.contains("timeout") {
            DispatchError::Timeout
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl SpecialistTransport for OpenAiSpecialistTransport {
    async fn dispatch(&self, request: DispatchRequest<'_>) -> Result<String, DispatchError> {
        let message = if let Some(image_b64) = request.image_base64_png {
            let image_url = format!("data:image/png;base64,{image_b64}");
            let content = vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(request.user_prompt)
                    .build()
                    .map_err(|err| DispatchError::Transport(err.to_string()))?
                    .into(),
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image_url)
                            .detail(ImageDetail::High)
                            .build()
                            .map_err(|err| DispatchError::Transport(err.to_string()))?,
                    )
                    .build()
                    .map_err(|err| DispatchError::Transport(err.to_string()))?
                    .into(),
            ];
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content))
                .build()
                .map_err(|err| DispatchError::Transport(err.to_string()))?
        } else {
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user_prompt)
                .build()
                .map_err(|err| DispatchError::Transport(err.to_string()))?
        };

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(request.temperature)
            .max_tokens(request.max_output_tokens)
            .messages(vec![
                async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system_prompt)
                    .build()
                    .map_err(|err| DispatchError::Transport(err.to_string()))?
                    .into(),
                message.into(),
            ])
            .build()
            .map_err(|err| DispatchError::Transport(err.to_string()))?;

        let response = tokio::time::timeout(
            std::time::Duration::from_secs(self.per_attempt_timeout_secs),
            self.client.chat().create(chat_request),
        )
        .await
        .map_err(|_| DispatchError::Timeout)?
        .map_err(|err| Self::classify(&err))?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            DispatchError::Transport("specialist returned no choices".to_string())
        })?;

        choice
            .message
            .content
            .ok_or_else(|| DispatchError::Transport("specialist returned empty content".to_string()))
    }
}
