use async_openai::error::OpenAIError;
use thiserror::Error;

/// Core internal error type shared by every Sturgeon crate.
///
/// Each variant corresponds to one of the error kinds the orchestrator and
/// endpoint handlers reason about; `api-router` maps these to HTTP status
/// codes and a sanitized client-facing envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("input invalid: {0}")]
    InputInvalid(String),

    #[error("rate limited")]
    RateLimited,

    #[error("session busy")]
    SessionBusy,

    #[error("rag blocked: {0}")]
    RagBlocked(String),

    #[error("specialist token overflow: {0}")]
    SpecialistOverflow(String),

    #[error("specialist refused: {0}")]
    SpecialistRefusal(String),

    #[error("specialist timeout")]
    SpecialistTimeout,

    #[error("specialist transport error: {0}")]
    SpecialistTransport(String),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),

    #[error("could not parse model output: {0}")]
    ParseFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),

    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-stable tag used in the error envelope's `error` field
    /// and in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputInvalid(_) => "INPUT_INVALID",
            Self::RateLimited => "RATE_LIMITED",
            Self::SessionBusy => "SESSION_BUSY",
            Self::RagBlocked(_) => "RAG_BLOCKED",
            Self::SpecialistOverflow(_) => "SPECIALIST_OVERFLOW",
            Self::SpecialistRefusal(_) => "SPECIALIST_REFUSAL",
            Self::SpecialistTimeout => "SPECIALIST_TIMEOUT",
            Self::SpecialistTransport(_) => "SPECIALIST_TRANSPORT",
            Self::ValidationFailure(_) => "VALIDATION_FAILURE",
            Self::OrchestratorUnavailable(_) => "ORCHESTRATOR_UNAVAILABLE",
            Self::ParseFailure(_) => "PARSE_FAILURE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::OpenAI(_) | Self::Reqwest(_) | Self::Io(_) | Self::Config(_) => "INTERNAL",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_returns_expected_machine_tags() {
        assert_eq!(AppError::SessionBusy.kind(), "SESSION_BUSY");
        assert_eq!(AppError::RagBlocked("too long".into()).kind(), "RAG_BLOCKED");
        assert_eq!(
            AppError::ValidationFailure("ferritin".into()).kind(),
            "VALIDATION_FAILURE"
        );
    }
}
