//! API error handling with structured responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use runlet_protocol::ErrorResponse;
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::AuthError;
use crate::process::ProcessError;

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Process(ProcessError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Process(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::FORBIDDEN,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::Auth(_) => "UNAUTHENTICATED",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if let Self::Auth(err) = self {
            return err.into_response();
        }
        if let Self::Process(ProcessError::KillFailed(source)) = &self {
            error!(error_code = code, error = %source, "Kill failed");
        } else {
            debug!(error_code = code, message = %self, "Client error");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
