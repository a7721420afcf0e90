//! Authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use log::debug;
use rustls::pki_types::CertificateDer;

use super::{AuthError, IdentityResolver};
use crate::process::UserId;

/// Client certificate chain of the connection a request arrived on.
///
/// The server inserts this into every request's extensions after the TLS
/// handshake. `None` means the peer presented no certificate.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates(pub Option<Arc<[CertificateDer<'static>]>>);

impl PeerCertificates {
    pub fn new(chain: Option<&[CertificateDer<'_>]>) -> Self {
        Self(chain.map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect()))
    }

    pub fn chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.0.as_deref()
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or(AuthError::MissingCertificate)
    }
}

/// Authentication middleware.
///
/// Resolves the connection's client certificate to a user and injects
/// `CurrentUser` into request extensions. Requests without a known
/// certificate are answered with 403 before reaching a handler.
pub async fn auth_middleware(
    State(identity): State<Arc<IdentityResolver>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let peer = req.extensions().get::<PeerCertificates>();
    let user = identity.resolve(peer.and_then(PeerCertificates::chain))?;

    debug!("{} {} authenticated as user {}", req.method(), req.uri().path(), user);
    req.extensions_mut().insert(CurrentUser { id: user });
    Ok(next.run(req).await)
}
