//! Process manager behavior across users and concurrent callers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use runlet::process::{Manager, ProcessError, ProcessStatus, TerminalState, UserId};
use tempfile::TempDir;

async fn wait_terminal(manager: &Manager, id: &str, user: UserId) -> TerminalState {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(state) = manager.status(id, user).unwrap() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("process did not terminate in time")
}

#[tokio::test]
async fn test_status_immediately_after_start() {
    let manager = Manager::default();
    let id = manager.start("sleep 5", 1).unwrap().to_string();

    assert_eq!(manager.status(&id, 1).unwrap(), None);
    manager.stop(&id, 1).await.unwrap();
}

#[tokio::test]
async fn test_ids_are_scoped_to_their_owner() {
    let manager = Manager::default();
    manager.add_user(1);
    manager.add_user(2);
    let id = manager.start("sleep 5", 1).unwrap().to_string();

    assert!(matches!(manager.status(&id, 2), Err(ProcessError::NotFound(_))));
    assert!(matches!(manager.log(&id, 2), Err(ProcessError::NotFound(_))));
    assert!(matches!(
        manager.stop(&id, 2).await,
        Err(ProcessError::NotFound(_))
    ));
    assert!(manager.list(2).is_empty());

    manager.stop(&id, 1).await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure_leaves_list_unchanged() {
    let manager = Manager::default();
    let id = manager.start("true", 1).unwrap();
    let before = manager.list(1);

    let err = manager.start("nonexistent-binary-xyz", 1).unwrap_err();
    assert!(matches!(err, ProcessError::SpawnFailed { .. }));

    let after = manager.list(1);
    assert_eq!(after.len(), before.len());
    assert_eq!(after[0].id, id.to_string());
}

#[tokio::test]
async fn test_stop_leads_to_terminal_state() {
    let manager = Manager::default();
    let id = manager.start("sleep 30", 1).unwrap().to_string();

    manager.stop(&id, 1).await.unwrap();
    let state = wait_terminal(&manager, &id, 1).await;

    assert_eq!(state.signal, Some(9));
    assert!(!state.success);
    assert_eq!(manager.list(1)[0].status, ProcessStatus::Terminated);
}

#[tokio::test]
async fn test_stop_reaches_terminal_state_with_lingering_grandchild() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("linger.sh");
    std::fs::write(&script, "sleep 20\necho done\n").unwrap();

    let manager = Manager::default();
    let id = manager
        .start(&format!("sh {}", script.display()), 1)
        .unwrap()
        .to_string();
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.stop(&id, 1).await.unwrap();
    let state = wait_terminal(&manager, &id, 1).await;

    assert_eq!(state.signal, Some(9));
    assert_eq!(manager.list(1)[0].status, ProcessStatus::Terminated);
    assert_eq!(manager.purge(1), 1);
}

#[tokio::test]
async fn test_log_grows_monotonically() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("ticker.sh");
    std::fs::write(&script, "echo one\nsleep 0.3\necho two\n").unwrap();

    let manager = Manager::default();
    let id = manager
        .start(&format!("sh {}", script.display()), 1)
        .unwrap()
        .to_string();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let first = manager.log(&id, 1).unwrap().bytes;
    wait_terminal(&manager, &id, 1).await;
    let second = manager.log(&id, 1).unwrap().bytes;

    assert!(second.starts_with(&first));
    assert_eq!(second, b"one\ntwo\n");
}

#[tokio::test]
async fn test_echo_hello_completes_successfully() {
    let manager = Manager::default();
    let id = manager.start("echo hello", 1).unwrap().to_string();

    let state = wait_terminal(&manager, &id, 1).await;
    assert!(state.success);
    assert_eq!(state.exit_code, Some(0));
    assert_eq!(manager.log(&id, 1).unwrap().bytes, b"hello\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_are_each_listed_once() {
    let manager = Arc::new(Manager::default());

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start("true", 7).unwrap() })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap().to_string());
    }
    assert_eq!(ids.len(), 32);

    let listed: Vec<String> = manager.list(7).into_iter().map(|s| s.id).collect();
    assert_eq!(listed.len(), 32);
    assert_eq!(listed.into_iter().collect::<HashSet<_>>(), ids);
    assert_eq!(manager.user_count(), 1);
}

#[tokio::test]
async fn test_purge_only_touches_caller() {
    let manager = Manager::default();
    let mine = manager.start("true", 1).unwrap().to_string();
    let theirs = manager.start("true", 2).unwrap().to_string();
    wait_terminal(&manager, &mine, 1).await;
    wait_terminal(&manager, &theirs, 2).await;

    assert_eq!(manager.purge(1), 1);
    assert!(manager.list(1).is_empty());
    assert_eq!(manager.list(2).len(), 1);
}
