//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::debug;
use runlet_protocol::ErrorResponse;
use thiserror::Error;

use super::identity::Fingerprint;

/// Reasons a request is unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The connection carried no client certificate.
    #[error("no client certificate presented")]
    MissingCertificate,

    /// A chain was presented but it was empty.
    #[error("client certificate chain is empty")]
    EmptyChain,

    /// The leaf certificate is not bound to any user.
    #[error("unknown client certificate {0}")]
    UnknownCertificate(Fingerprint),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        debug!("Rejecting request: {}", self);

        // The reason stays in the server log.
        let body = Json(ErrorResponse {
            error: "forbidden".to_string(),
            code: "UNAUTHENTICATED".to_string(),
        });

        (StatusCode::FORBIDDEN, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            AuthError::MissingCertificate.to_string(),
            "no client certificate presented"
        );
        assert_eq!(
            AuthError::EmptyChain.to_string(),
            "client certificate chain is empty"
        );

        let fingerprint = Fingerprint::of(b"not really a certificate");
        let err = AuthError::UnknownCertificate(fingerprint);
        assert!(err.to_string().starts_with("unknown client certificate "));
    }

    #[test]
    fn test_auth_error_is_forbidden() {
        let response = AuthError::EmptyChain.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
