//! Per-user process registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use runlet_protocol::ProcessSummary;

use super::handle::{ProcessHandle, ProcessId};
use super::manager::UserId;

/// Processes owned by one user.
///
/// The lock guards only the map. Callers clone the `Arc<ProcessHandle>` out
/// and read its state after the lock is released.
#[derive(Debug)]
pub struct UserRegistry {
    user: UserId,
    processes: RwLock<HashMap<ProcessId, Arc<ProcessHandle>>>,
}

impl UserRegistry {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            processes: RwLock::new(HashMap::new()),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Register a fully spawned handle.
    pub fn insert(&self, handle: ProcessHandle) -> Arc<ProcessHandle> {
        let handle = Arc::new(handle);
        self.processes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.id(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: &ProcessId) -> Option<Arc<ProcessHandle>> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Summaries in map order.
    pub fn summaries(&self) -> Vec<ProcessSummary> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|handle| handle.summary())
            .collect()
    }

    /// Drop every handle whose process has terminated. Returns how many were removed.
    pub fn purge_terminated(&self) -> usize {
        let mut processes = self
            .processes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = processes.len();
        processes.retain(|_, handle| handle.is_running());
        let purged = before - processes.len();
        debug!("Purged {} terminated processes for user {}", purged, self.user);
        purged
    }

    pub fn len(&self) -> usize {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_until_terminated(handle: &ProcessHandle) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("process did not exit in time");
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let registry = UserRegistry::new(1);
        assert!(registry.is_empty());

        let handle = ProcessHandle::spawn(ProcessId::new(), "true", &[], None).unwrap();
        let id = handle.id();
        registry.insert(handle);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().id(), id);
        assert!(registry.get(&ProcessId::new()).is_none());
    }

    #[tokio::test]
    async fn test_summaries_cover_every_entry() {
        let registry = UserRegistry::new(7);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let handle = ProcessHandle::spawn(ProcessId::new(), "true", &[], None).unwrap();
            ids.push(registry.insert(handle).id().to_string());
        }

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 3);
        for id in ids {
            assert_eq!(summaries.iter().filter(|s| s.id == id).count(), 1);
        }
        assert!(summaries.iter().all(|s| s.name == "true"));
    }

    #[tokio::test]
    async fn test_purge_keeps_running_processes() {
        let registry = UserRegistry::new(1);

        let done = registry.insert(ProcessHandle::spawn(ProcessId::new(), "true", &[], None).unwrap());
        let running =
            registry.insert(ProcessHandle::spawn(ProcessId::new(), "sleep", &["60"], None).unwrap());
        wait_until_terminated(&done).await;

        assert_eq!(registry.purge_terminated(), 1);
        assert!(registry.get(&done.id()).is_none());
        assert!(registry.get(&running.id()).is_some());

        running.kill().await.unwrap();
    }
}
