//! HTTP error mapping for the gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_context::ContextError;
use parley_runtime::{CompletionError, ProviderError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no credential supplied and no default API key configured")]
    MissingCredential,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingCredential => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Completion(err) => completion_status(err),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingCredential => "missing_credential",
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Completion(CompletionError::Budget(ContextError::BudgetExceeded { .. })) => {
                "budget_exceeded"
            }
            ApiError::Completion(CompletionError::Budget(ContextError::PromptTooLong { .. })) => {
                "prompt_too_long"
            }
            ApiError::Completion(CompletionError::Budget(ContextError::TokenCountError(_))) => {
                "token_count_failed"
            }
            ApiError::Completion(CompletionError::MalformedFrame { .. }) => "malformed_frame",
            ApiError::Completion(CompletionError::UpstreamProtocol { .. }) => "upstream_error",
            ApiError::Completion(CompletionError::Provider(ProviderError::Timeout(_))) => {
                "upstream_timeout"
            }
            ApiError::Completion(CompletionError::Provider(_)) => "upstream_unavailable",
        }
    }
}

fn completion_status(err: &CompletionError) -> StatusCode {
    match err {
        CompletionError::Budget(ContextError::TokenCountError(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        CompletionError::Budget(_) => StatusCode::BAD_REQUEST,
        CompletionError::Provider(ProviderError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        // Upstream auth and rate-limit failures pass through unchanged.
        CompletionError::Provider(ProviderError::HttpStatus { status, .. })
            if matches!(*status, 401 | 403 | 429) =>
        {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        CompletionError::Provider(_)
        | CompletionError::MalformedFrame { .. }
        | CompletionError::UpstreamProtocol { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "completion failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
