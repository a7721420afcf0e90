//! Authentication module.
//!
//! Users are identified by the client certificate presented during the TLS
//! handshake. There are no passwords or tokens.

mod error;
mod identity;
mod middleware;

pub use error::AuthError;
pub use identity::{BindingError, Fingerprint, IdentityResolver, UserBinding};
pub use middleware::{CurrentUser, PeerCertificates, auth_middleware};
