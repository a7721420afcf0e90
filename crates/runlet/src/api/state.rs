//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::IdentityResolver;
use crate::process::Manager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub identity: Arc<IdentityResolver>,
}

impl AppState {
    pub fn new(manager: Arc<Manager>, identity: Arc<IdentityResolver>) -> Self {
        Self { manager, identity }
    }
}
