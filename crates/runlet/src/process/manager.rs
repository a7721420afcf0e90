//! Process manager.
//!
//! Owns one [`UserRegistry`] per user identity and exposes the start, stop,
//! status, log and list operations. Every operation is scoped to the caller's
//! registry; an id owned by another user looks exactly like an unknown id.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};
use runlet_protocol::{ProcessSummary, TerminalState};
use serde::{Deserialize, Serialize};

use super::error::{ProcessError, ProcessResult};
use super::handle::{ProcessHandle, ProcessId};
use super::registry::UserRegistry;

/// Operator-assigned user identity.
pub type UserId = u32;

/// Process manager configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Per-process cap on captured output. `None` keeps everything.
    pub max_log_bytes: Option<usize>,
}

/// Output captured from a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub bytes: Vec<u8>,
    /// Output beyond `max_log_bytes` was dropped.
    pub truncated: bool,
}

/// Manager for user processes.
#[derive(Debug, Default)]
pub struct Manager {
    users: DashMap<UserId, Arc<UserRegistry>>,
    config: ManagerConfig,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            users: DashMap::new(),
            config,
        }
    }

    /// Provision an empty registry for `user`. Returns `false` if it already existed.
    pub fn add_user(&self, user: UserId) -> bool {
        match self.users.entry(user) {
            Entry::Occupied(_) => {
                info!("User id {} already exists", user);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(UserRegistry::new(user)));
                debug!("Provisioned process registry for user {}", user);
                true
            }
        }
    }

    pub fn has_user(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Get-or-create the registry for `user`.
    ///
    /// Creation happens under the map's shard lock, so concurrent first
    /// touches for the same user converge on one registry.
    fn registry(&self, user: UserId) -> Arc<UserRegistry> {
        if let Some(registry) = self.users.get(&user) {
            return Arc::clone(registry.value());
        }

        let registry = self.users.entry(user).or_insert_with(|| {
            warn!("Unknown user id {} in process table, provisioning", user);
            Arc::new(UserRegistry::new(user))
        });
        Arc::clone(registry.value())
    }

    fn lookup(&self, process_id: &str, user: UserId) -> ProcessResult<Arc<ProcessHandle>> {
        let id: ProcessId = process_id.parse()?;
        self.registry(user)
            .get(&id)
            .ok_or_else(|| ProcessError::NotFound(process_id.to_string()))
    }

    /// Spawn `command` for `user` and return the new process id.
    ///
    /// The command is split on whitespace; there is no shell quoting. If the
    /// spawn fails nothing is registered.
    pub fn start(&self, command: &str, user: UserId) -> ProcessResult<ProcessId> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(ProcessError::InvalidCommand)?;
        let args: Vec<&str> = parts.collect();

        let id = ProcessId::new();
        let handle = ProcessHandle::spawn(id, program, &args, self.config.max_log_bytes)?;
        self.registry(user).insert(handle);

        info!("User {} started process {} ({})", user, id, program);
        Ok(id)
    }

    /// Send SIGKILL to one of the user's processes.
    pub async fn stop(&self, process_id: &str, user: UserId) -> ProcessResult<()> {
        let handle = self.lookup(process_id, user)?;
        handle.kill().await?;
        info!("User {} killed process {}", user, process_id);
        Ok(())
    }

    /// Terminal state of the process, `None` while it is still running.
    pub fn status(&self, process_id: &str, user: UserId) -> ProcessResult<Option<TerminalState>> {
        Ok(self.lookup(process_id, user)?.status())
    }

    /// Everything the process has written to stdout and stderr so far.
    pub fn log(&self, process_id: &str, user: UserId) -> ProcessResult<ProcessOutput> {
        let handle = self.lookup(process_id, user)?;
        Ok(ProcessOutput {
            bytes: handle.log(),
            truncated: handle.is_log_truncated(),
        })
    }

    pub fn list(&self, user: UserId) -> Vec<ProcessSummary> {
        self.registry(user).summaries()
    }

    /// Forget the user's terminated processes.
    pub fn purge(&self, user: UserId) -> usize {
        let purged = self.registry(user).purge_terminated();
        if purged > 0 {
            info!("User {} purged {} terminated processes", user, purged);
        }
        purged
    }
}
