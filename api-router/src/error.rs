//! Maps `AppError` onto a uniform HTTP error envelope:
//! `{error, detail, validation_warnings?}`, with `error` set to the same
//! machine-stable kind tag `AppError::kind()` uses internally.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    inner: AppError,
    validation_warnings: Vec<String>,
}

impl ApiError {
    /// Attaches non-fatal validation warnings to an otherwise-successful
    /// response's error path doesn't apply here; this is only used when an
    /// endpoint chooses to surface warnings alongside a hard failure.
    pub fn with_warnings(inner: AppError, validation_warnings: Vec<String>) -> Self {
        Self {
            inner,
            validation_warnings,
        }
    }

    fn status(&self) -> StatusCode {
        match &self.inner {
            AppError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::SessionBusy => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RagBlocked(_) => StatusCode::BAD_REQUEST,
            AppError::SpecialistOverflow(_)
            | AppError::SpecialistRefusal(_)
            | AppError::SpecialistTimeout
            | AppError::SpecialistTransport(_)
            | AppError::ValidationFailure(_)
            | AppError::OrchestratorUnavailable(_)
            | AppError::ParseFailure(_)
            | AppError::OpenAI(_)
            | AppError::Reqwest(_)
            | AppError::Io(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(inner: AppError) -> Self {
        Self {
            inner,
            validation_warnings: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    validation_warnings: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(kind = self.inner.kind(), error = %self.inner, "request failed");
        }
        let body = ErrorEnvelope {
            error: self.inner.kind(),
            detail: self.inner.to_string(),
            validation_warnings: self.validation_warnings,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_busy_maps_to_409() {
        let error = ApiError::from(AppError::SessionBusy);
        assert_eq!(error.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn input_invalid_maps_to_400() {
        let error = ApiError::from(AppError::InputInvalid("challenge too long".to_string()));
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_session_maps_to_404() {
        let error = ApiError::from(AppError::NotFound("unknown session".to_string()));
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn specialist_timeout_maps_to_500() {
        let error = ApiError::from(AppError::SpecialistTimeout);
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_body_carries_kind_and_detail() {
        let response = ApiError::from(AppError::RateLimited).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
