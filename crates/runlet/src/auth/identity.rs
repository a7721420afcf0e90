//! Certificate-derived identity resolution.
//!
//! Each trusted client certificate is reduced to the SHA-256 digest of its DER
//! bytes and bound to an operator-assigned user id. The table is filled at
//! startup and only read afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use log::info;
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::AuthError;
use crate::process::UserId;
use crate::tls::{self, TlsError};

/// SHA-256 fingerprint of a DER-encoded certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// A `[[users]]` entry: the certificate a user authenticates with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBinding {
    pub id: UserId,
    /// Client certificate (PEM). Only the first certificate in the file is bound.
    pub cert: PathBuf,
}

/// Errors building the binding table.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error(transparent)]
    Certificate(#[from] TlsError),

    #[error("certificate {fingerprint} is bound to both user {existing} and user {requested}")]
    Conflict {
        fingerprint: Fingerprint,
        existing: UserId,
        requested: UserId,
    },
}

/// Maps a presented client certificate to a user id.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    table: HashMap<Fingerprint, UserId>,
    certificates: Vec<CertificateDer<'static>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every binding's certificate from disk.
    pub fn from_bindings(bindings: &[UserBinding]) -> Result<Self, BindingError> {
        let mut resolver = Self::new();
        for binding in bindings {
            let cert = tls::load_certificate(&binding.cert)?;
            let fingerprint = resolver.bind(binding.id, cert)?;
            info!(
                "Bound user {} to certificate {} ({})",
                binding.id,
                binding.cert.display(),
                fingerprint
            );
        }
        Ok(resolver)
    }

    /// Bind `cert` to `user`. Binding the same certificate to the same user
    /// twice is a no-op; binding it to a different user is an error.
    pub fn bind(
        &mut self,
        user: UserId,
        cert: CertificateDer<'static>,
    ) -> Result<Fingerprint, BindingError> {
        let fingerprint = Fingerprint::of(cert.as_ref());
        match self.table.get(&fingerprint) {
            Some(&existing) if existing == user => Ok(fingerprint),
            Some(&existing) => Err(BindingError::Conflict {
                fingerprint,
                existing,
                requested: user,
            }),
            None => {
                self.table.insert(fingerprint, user);
                self.certificates.push(cert);
                Ok(fingerprint)
            }
        }
    }

    /// Resolve the user behind a connection's certificate chain.
    ///
    /// Only the leaf (first) certificate is consulted. Whether the chain is
    /// trusted was already decided by the TLS handshake.
    pub fn resolve(&self, chain: Option<&[CertificateDer<'_>]>) -> Result<UserId, AuthError> {
        let chain = chain.ok_or(AuthError::MissingCertificate)?;
        let leaf = chain.first().ok_or(AuthError::EmptyChain)?;
        let fingerprint = Fingerprint::of(leaf.as_ref());
        self.table
            .get(&fingerprint)
            .copied()
            .ok_or(AuthError::UnknownCertificate(fingerprint))
    }

    /// Distinct user ids in the table, ascending.
    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.table.values().copied().collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Certificates the TLS layer accepts as client leaves.
    pub fn trusted_certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
