//! TLS setup for the mutual-TLS listener.
//!
//! Clients must present either one of the bound client certificates, matched
//! byte for byte, or a certificate that chains to the optional client CA
//! bundle. Only TLS 1.3 is offered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig,
    SignatureScheme,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TLS errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Reading or parsing a certificate file failed.
    #[error("certificate error in {path}: {message}")]
    Certificate { path: PathBuf, message: String },

    /// The file contained no certificate.
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),

    /// Reading or parsing a private key failed.
    #[error("private key error in {path}: {message}")]
    PrivateKey { path: PathBuf, message: String },

    /// rustls rejected the configuration.
    #[error("TLS configuration error: {0}")]
    Config(String),
}

/// Server certificate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Server certificate chain (PEM).
    pub cert: PathBuf,
    /// Server private key (PEM).
    pub key: PathBuf,
    /// Extra CA bundle for verifying client certificates (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("certs/cert.pem"),
            key: PathBuf::from("certs/key.pem"),
            client_ca: None,
        }
    }
}

/// Load every certificate from a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| TlsError::Certificate {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first certificate of a PEM file.
pub fn load_certificate(path: &Path) -> Result<CertificateDer<'static>, TlsError> {
    load_certificates(path)?
        .into_iter()
        .next()
        .ok_or_else(|| TlsError::NoCertificate(path.to_path_buf()))
}

/// Load a PEM private key (PKCS#8, PKCS#1 or SEC1).
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| TlsError::PrivateKey {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client verifier for bound certificates.
///
/// A leaf whose DER bytes equal a bound certificate is accepted as is, which
/// covers self-signed certificates regardless of their basic constraints.
/// Anything else goes to the client CA verifier when one is configured.
/// Handshake signatures are always checked against the leaf's key.
#[derive(Debug)]
struct BoundClientVerifier {
    bound: Vec<CertificateDer<'static>>,
    fallback: Option<Arc<dyn ClientCertVerifier>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl BoundClientVerifier {
    fn new(
        bound: &[CertificateDer<'static>],
        client_ca: Option<&Path>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, TlsError> {
        let fallback = match client_ca {
            Some(path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certificates(path)? {
                    roots.add(cert).map_err(|e| TlsError::Certificate {
                        path: path.to_path_buf(),
                        message: format!("failed to add CA certificate: {e}"),
                    })?;
                }
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                        .build()
                        .map_err(|e| TlsError::Config(format!("client verifier error: {e}")))?;
                Some(verifier)
            }
            None => None,
        };

        if bound.is_empty() && fallback.is_none() {
            return Err(TlsError::Config(
                "no client certificates are trusted".to_string(),
            ));
        }

        Ok(Self {
            bound: bound.to_vec(),
            fallback,
            algorithms: provider.signature_verification_algorithms,
        })
    }
}

impl ClientCertVerifier for BoundClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        match self.fallback {
            Some(ref fallback) => fallback.root_hint_subjects(),
            None => &[],
        }
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        if self.bound.iter().any(|cert| cert.as_ref() == end_entity.as_ref()) {
            return Ok(ClientCertVerified::assertion());
        }
        match self.fallback {
            Some(ref fallback) => fallback.verify_client_cert(end_entity, intermediates, now),
            None => Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Build the server configuration, requiring client certificates.
pub fn server_config(
    settings: &TlsSettings,
    trusted_clients: &[CertificateDer<'static>],
) -> Result<Arc<ServerConfig>, TlsError> {
    let verifier =
        BoundClientVerifier::new(trusted_clients, settings.client_ca.as_deref(), provider())?;

    let chain = load_certificates(&settings.cert)?;
    let key = load_private_key(&settings.key)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(chain, key)
        .map_err(|e| TlsError::Config(format!("server certificate error: {e}")))?;

    Ok(Arc::new(config))
}
