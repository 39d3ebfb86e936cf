//! Result Store Integration Tests
//!
//! File-backed store-mode results and their handles.

use std::sync::Arc;

use actionflow::actions::register_builtins;
use actionflow::controller::{ActionController, AttemptError, AttemptInfo};
use actionflow::domain::{ActionStatement, ErrorKind, Role, RunActionInput, RunContext};
use actionflow::executor::{
    ActionResultHandle, FsResultStore, LocalExecutor, ResultStore, StoreError, StoreObjectPtr,
};
use actionflow::registry::ActionRegistry;
use serde_json::json;
use tempfile::TempDir;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_store_run_writes_under_execution_path() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsResultStore::new(temp.path()));

    let mut registry = ActionRegistry::new();
    register_builtins(&mut registry).unwrap();
    let executor = LocalExecutor::with_store(Arc::new(registry), store.clone());
    let controller = ActionController::new(Arc::new(executor));

    let items: Vec<i32> = (0..100).collect();
    let payload = json!({ "items": items });
    let input = RunActionInput::new(
        ActionStatement::new("shape", "core.reshape").with_arg("value", payload.clone()),
        RunContext::new("wf-7", "wf-7:exec-42"),
    );

    let ptr = assert_ok!(
        controller
            .run_action_with_store(&input, &Role::service(), &AttemptInfo::new(1))
            .await
    );

    assert_eq!(ptr.key, "wf-7/exec-42/shape.json");
    assert!(temp.path().join("wf-7/exec-42/shape.json").exists());
    assert_eq!(store.resolve(&ptr).await.unwrap(), payload);
}

#[tokio::test]
async fn test_store_write_failure_is_retryable() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("store-file");
    std::fs::write(&blocker, "occupied").unwrap();

    let mut registry = ActionRegistry::new();
    register_builtins(&mut registry).unwrap();
    let executor = LocalExecutor::with_store(Arc::new(registry), Arc::new(FsResultStore::new(&blocker)));
    let controller = ActionController::new(Arc::new(executor));

    let input = RunActionInput::new(
        ActionStatement::new("shape", "core.reshape").with_arg("value", json!(1)),
        RunContext::new("wf-7", "wf-7:exec-42"),
    );
    let result = controller
        .run_action_with_store(&input, &Role::service(), &AttemptInfo::new(2))
        .await;

    let failure = match result {
        Err(AttemptError::Failed(failure)) => failure,
        other => panic!("expected a failure, got {other:?}"),
    };
    assert_eq!(failure.kind, ErrorKind::UnknownError);
    assert!(!failure.non_retryable);
    assert!(failure.message.starts_with("[core.reshape@shape] (Attempt 2)"));
}

#[tokio::test]
async fn test_results_survive_store_reopen() {
    let temp = TempDir::new().unwrap();
    let handle = ActionResultHandle::new("wf-1:exec-1", "step1");
    let key = handle.to_path("json").unwrap();

    FsResultStore::new(temp.path())
        .put_json(&key, &json!({ "ok": true }))
        .await
        .unwrap();

    let reopened = FsResultStore::new(temp.path());
    let ptr = handle.to_pointer().unwrap();
    assert_eq!(reopened.resolve(&ptr).await.unwrap(), json!({ "ok": true }));
}

#[tokio::test]
async fn test_overwrite_replaces_shorter() {
    let temp = TempDir::new().unwrap();
    let store = FsResultStore::new(temp.path());
    let key = "wf-1/exec-1/step1.json";

    store.put_json(key, &json!("a much longer first value")).await.unwrap();
    store.put_json(key, &json!(1)).await.unwrap();

    assert_eq!(store.get_json(key).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_concurrent_writes_stay_consistent() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsResultStore::new(temp.path()));
    let key = "wf-1/exec-1/race.json";

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.put_json(key, &json!({ "writer": i })).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Whichever writer won, the envelope is intact and verifies
    let value = store.get_json(key).await.unwrap();
    assert!(value["writer"].as_i64().is_some());
}

#[tokio::test]
async fn test_missing_pointer() {
    let temp = TempDir::new().unwrap();
    let store = FsResultStore::new(temp.path());
    let ptr = StoreObjectPtr {
        key: "wf-1/exec-1/nothing.json".to_string(),
    };

    assert!(matches!(store.resolve(&ptr).await, Err(StoreError::NotFound(_))));
}

#[test]
fn test_handle_with_colon_in_suffix() {
    let handle = ActionResultHandle::new("wf-1:exec:retry-2", "step1");
    let path = handle.to_path("json").unwrap();

    assert_eq!(path, "wf-1/exec:retry-2/step1.json");
    assert_eq!(ActionResultHandle::from_path(&path).unwrap(), handle);
}
