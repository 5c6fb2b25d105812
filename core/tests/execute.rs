//! End-to-end tests driving the execution manager with stand-in assistant
//! processes. Each test configures `/bin/sh` as the assistant so the full
//! pipeline (sandbox, rate limit, context, spawn, classify, broadcast)
//! runs against a real child process.

#![cfg(unix)]
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use huddle_core::ExecutionManager;
use huddle_core::RoomCoordinator;
use huddle_core::chat_log::MemoryChatLog;
use huddle_core::config::Config;
use huddle_core::config::ConfigOverrides;
use huddle_core::config::ConfigToml;
use huddle_core::context_store::ContextStore;
use huddle_core::error::ExecutionError;
use huddle_core::error::PromptRejection;
use huddle_core::execution_manager::RESET_OUTPUT;
use huddle_protocol::protocol::ActionKind;
use huddle_protocol::protocol::ErrorKind;
use huddle_protocol::protocol::ExecutionRequest;
use huddle_protocol::protocol::RoomEvent;

const HAPPY_SCRIPT: &str = "cat >/dev/null; printf 'Created README.md'";

fn test_config(script: &str, overrides: ConfigOverrides) -> Config {
    Config::load_from_base_config_with_overrides(
        ConfigToml::default(),
        ConfigOverrides {
            assistant_program: Some("/bin/sh".to_string()),
            assistant_args: Some(vec!["-c".to_string(), script.to_string()]),
            exec_timeout: overrides.exec_timeout.or(Some(Duration::from_secs(10))),
            ..overrides
        },
        PathBuf::from("/tmp/huddle-test-home"),
    )
}

fn build_manager(config: Config) -> (Arc<ExecutionManager>, Arc<RoomCoordinator>) {
    let rooms = Arc::new(RoomCoordinator::new(Arc::new(MemoryChatLog::new())));
    let manager = Arc::new(ExecutionManager::new(config, rooms.clone()));
    (manager, rooms)
}

fn request(actor: &str, directory: &Path, prompt: &str) -> ExecutionRequest {
    ExecutionRequest {
        actor_id: actor.to_string(),
        directory: directory.to_path_buf(),
        action: ActionKind::Generate,
        prompt: prompt.to_string(),
        context_enabled: true,
    }
}

fn drain(rx: &Receiver<RoomEvent>) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Tempdir resolved the way the sandbox will resolve it, so room joins and
/// execution requests agree on the directory key.
fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let canonical = tmp.path().canonicalize().unwrap();
    (tmp, canonical)
}

#[tokio::test]
async fn command_runs_and_peers_observe_the_lifecycle() {
    let (_tmp, dir) = canonical_tempdir();
    let (manager, rooms) = build_manager(test_config(HAPPY_SCRIPT, ConfigOverrides::default()));

    let (tx, bob_rx) = async_channel::bounded(16);
    rooms.join("bob", &dir, tx);
    drain(&bob_rx);

    let result = manager
        .execute(request("alice", &dir, "add a README"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, "Created README.md");
    assert!(result.error_kind.is_none());

    // First use created the context document with its header.
    let doc = std::fs::read_to_string(ContextStore::document_path(&dir)).unwrap();
    assert!(doc.starts_with("# Project Context"));

    let events = drain(&bob_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RoomEvent::CommandStarted { actor_id, command, .. }
            if actor_id == "alice" && command == "add a README"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        RoomEvent::CommandCompleted { success: true, .. }
    )));

    // The session table is purged once the run completes.
    assert!(manager.list_active_sessions().is_empty());
}

#[tokio::test]
async fn timeout_is_reported_distinctly_and_unlocks_peers() {
    let (_tmp, dir) = canonical_tempdir();
    let config = test_config(
        "cat >/dev/null; exec sleep 30",
        ConfigOverrides {
            exec_timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        },
    );
    let (manager, rooms) = build_manager(config);

    let (tx, bob_rx) = async_channel::bounded(16);
    rooms.join("bob", &dir, tx);
    drain(&bob_rx);

    let result = manager
        .execute(request("alice", &dir, "do something slow"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::TimedOut));

    let events = drain(&bob_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RoomEvent::CommandCompleted { success: false, .. }
    )));
}

#[tokio::test]
async fn process_failure_carries_the_diagnostic_output() {
    let (_tmp, dir) = canonical_tempdir();
    let (manager, _rooms) = build_manager(test_config(
        "cat >/dev/null; echo broken >&2; exit 2",
        ConfigOverrides::default(),
    ));

    let result = manager
        .execute(request("alice", &dir, "do something doomed"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ProcessFailed));
    let message = result.error_message.unwrap();
    assert!(message.contains("status 2"), "message was: {message}");
    assert!(message.contains("broken"), "message was: {message}");
}

#[tokio::test]
async fn reset_clears_context_without_consuming_the_rate_limit() {
    let (_tmp, dir) = canonical_tempdir();
    let config = test_config(
        HAPPY_SCRIPT,
        ConfigOverrides {
            rate_limit_ceiling: Some(1),
            ..Default::default()
        },
    );
    let (manager, _rooms) = build_manager(config);

    // Seed a document with an old entry, then reset it.
    manager
        .execute(request("alice", &dir, "seed the context"))
        .await
        .unwrap();
    let path = ContextStore::document_path(&dir);
    let mut content = std::fs::read_to_string(&path).unwrap();
    content.push_str("old entry\n");
    std::fs::write(&path, &content).unwrap();

    let result = manager.execute(request("alice", &dir, "/clear")).await.unwrap();
    assert!(result.success);
    assert_eq!(result.output, RESET_OUTPUT);
    assert_eq!(result.duration_ms, 0);

    let doc = std::fs::read_to_string(&path).unwrap();
    assert!(doc.lines().nth(2).unwrap().starts_with("Reset: "));
    assert!(!doc.contains("old entry"));
}

#[tokio::test]
async fn sandbox_rejections_happen_before_any_side_effect() {
    let (_tmp, dir) = canonical_tempdir();
    let config = test_config(
        HAPPY_SCRIPT,
        ConfigOverrides {
            rate_limit_ceiling: Some(1),
            ..Default::default()
        },
    );
    let (manager, _rooms) = build_manager(config);

    let err = manager
        .execute(request("alice", &dir, "please rm -rf the cache"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ExecutionError::PromptInvalid(PromptRejection::BlockedPattern("rm -rf"))
    );
    // The rejection consumed neither the rate limit nor created a context
    // document.
    assert!(!ContextStore::document_path(&dir).exists());
    let result = manager
        .execute(request("alice", &dir, "add a README"))
        .await
        .unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn the_ceiling_plus_first_call_is_rate_limited() {
    let (_tmp, dir) = canonical_tempdir();
    let config = test_config(
        HAPPY_SCRIPT,
        ConfigOverrides {
            rate_limit_ceiling: Some(2),
            ..Default::default()
        },
    );
    let (manager, _rooms) = build_manager(config);

    for _ in 0..2 {
        manager
            .execute(request("alice", &dir, "add a README"))
            .await
            .unwrap();
    }
    match manager
        .execute(request("alice", &dir, "add a README"))
        .await
    {
        Err(ExecutionError::RateLimited { retry_after_secs }) => {
            assert!(retry_after_secs > 0);
        }
        other => panic!("expected a rate-limit denial, got {other:?}"),
    }
}

#[tokio::test]
async fn executions_for_one_directory_never_overlap() {
    let (_tmp, dir) = canonical_tempdir();
    let script = "cat >/dev/null; date +%s%N >> order.log; sleep 0.2; date +%s%N >> order.log";
    let (manager, _rooms) = build_manager(test_config(script, ConfigOverrides::default()));

    let first = {
        let manager = manager.clone();
        let dir = dir.clone();
        tokio::spawn(async move { manager.execute(request("alice", &dir, "task one")).await })
    };
    let second = {
        let manager = manager.clone();
        let dir = dir.clone();
        tokio::spawn(async move { manager.execute(request("bob", &dir, "task two")).await })
    };
    let (first, second) = tokio::join!(first, second);
    assert!(first.unwrap().unwrap().success);
    assert!(second.unwrap().unwrap().success);

    let log = std::fs::read_to_string(dir.join("order.log")).unwrap();
    let stamps: Vec<u128> = log.lines().map(|l| l.parse().unwrap()).collect();
    assert_eq!(stamps.len(), 4);
    // Start/end pairs must not interleave: the first run's end precedes
    // the second run's start.
    assert!(
        stamps[1] <= stamps[2],
        "overlapping executions: {stamps:?}"
    );
}

#[tokio::test]
async fn kill_session_cancels_a_running_execution() {
    let (_tmp, dir) = canonical_tempdir();
    let (manager, _rooms) = build_manager(test_config(
        "cat >/dev/null; exec sleep 30",
        ConfigOverrides::default(),
    ));

    let pending = {
        let manager = manager.clone();
        let dir = dir.clone();
        tokio::spawn(async move { manager.execute(request("alice", &dir, "long task")).await })
    };

    // Wait until the session shows up in the administrative listing.
    let mut sessions = manager.list_active_sessions();
    for _ in 0..50 {
        if !sessions.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        sessions = manager.list_active_sessions();
    }
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].actor_id, "alice");

    assert!(manager.kill_session(sessions[0].session_id));
    let result = pending.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ProcessFailed));
    assert_eq!(result.error_message.as_deref(), Some("execution cancelled"));

    // The entry is gone; a second kill is a no-op.
    assert!(!manager.kill_session(sessions[0].session_id));
}

#[tokio::test]
async fn truncation_warning_is_prefixed_onto_the_next_output() {
    let (_tmp, dir) = canonical_tempdir();
    let config = test_config(
        HAPPY_SCRIPT,
        ConfigOverrides {
            context_line_cap: Some(20),
            ..Default::default()
        },
    );
    let (manager, _rooms) = build_manager(config);

    // Grow the document past the cap before the next command.
    manager
        .execute(request("alice", &dir, "seed the context"))
        .await
        .unwrap();
    let path = ContextStore::document_path(&dir);
    let mut content = std::fs::read_to_string(&path).unwrap();
    for i in 0..50 {
        content.push_str(&format!("entry {i}\n"));
    }
    std::fs::write(&path, &content).unwrap();

    let result = manager
        .execute(request("alice", &dir, "add a README"))
        .await
        .unwrap();
    assert!(result.success);
    assert!(
        result.output.starts_with("Context document truncated"),
        "output was: {}",
        result.output
    );
    assert!(result.output.ends_with("Created README.md"));
    assert!(std::fs::read_to_string(&path).unwrap().lines().count() <= 20);
}

#[tokio::test]
async fn context_storage_errors_do_not_fail_the_command() {
    let (_tmp, dir) = canonical_tempdir();
    let (manager, _rooms) = build_manager(test_config(HAPPY_SCRIPT, ConfigOverrides::default()));

    // A directory squatting on the document path makes every read fail.
    std::fs::create_dir(ContextStore::document_path(&dir)).unwrap();

    let result = manager
        .execute(request("alice", &dir, "add a README"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, "Created README.md");
}
