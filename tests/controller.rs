//! Controller Integration Tests
//!
//! One attempt of one step, end to end through the in-process executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actionflow::controller::{ActionController, ActionOutput, AttemptError, AttemptInfo};
use actionflow::domain::{
    ActionStatement, ApplicationFailure, DslTaskErrorInfo, ErrorKind, Role, RunActionInput,
    RunContext,
};
use actionflow::executor::{LocalExecutor, MemoryResultStore, ResultStore, ResultsBackend};
use actionflow::registry::{
    ActionError, ActionRegistry, ActionSpec, ParamSpec, Secrets, StaticSecretResolver, TypeTag,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

struct Harness {
    controller: ActionController,
    store: Arc<MemoryResultStore>,
    called: Arc<AtomicBool>,
    secrets_seen: Arc<Mutex<Option<Secrets>>>,
}

fn harness() -> Harness {
    let called = Arc::new(AtomicBool::new(false));
    let secrets_seen: Arc<Mutex<Option<Secrets>>> = Arc::new(Mutex::new(None));

    let resolver = StaticSecretResolver::default().with_secret("token", "t-1");
    let mut registry = ActionRegistry::with_resolver(Arc::new(resolver));

    let flag = Arc::clone(&called);
    registry
        .register(
            ActionSpec::new("core", "add")
                .param(ParamSpec::required("a", TypeTag::Int))
                .param(ParamSpec::required("b", TypeTag::Int))
                .handler(move |args, _| {
                    flag.store(true, Ordering::SeqCst);
                    async move {
                        Ok(json!(args["a"].as_i64().unwrap_or_default()
                            + args["b"].as_i64().unwrap_or_default()))
                    }
                }),
        )
        .unwrap();

    registry
        .register(
            ActionSpec::new("core", "fail")
                .param(ParamSpec::required("detail", TypeTag::Str))
                .param(ParamSpec::optional("retryable", TypeTag::Bool, json!(false)))
                .handler(|args, _| async move {
                    let detail = args["detail"].as_str().unwrap_or_default().to_string();
                    Err(ActionError::Domain {
                        detail,
                        retryable: args["retryable"].as_bool().unwrap_or(false),
                    })
                }),
        )
        .unwrap();

    registry
        .register(
            ActionSpec::new("core", "crash")
                .handler(|_, _| async { Err(ActionError::Unexpected(anyhow::anyhow!("disk on fire"))) }),
        )
        .unwrap();

    registry
        .register(ActionSpec::new("core", "nested").handler(|_, _| async {
            let nested = ApplicationFailure::new(ErrorKind::DomainActionError, "child workflow failed")
                .non_retryable(true)
                .with_details(DslTaskErrorInfo {
                    ref_: "child_step".to_string(),
                    message: "child workflow failed".to_string(),
                    kind: ErrorKind::DomainActionError,
                    attempt: 7,
                });
            Err(ActionError::Application(nested))
        }))
        .unwrap();

    registry
        .register(
            ActionSpec::new("core", "big")
                .param(ParamSpec::required("rows", TypeTag::Int))
                .handler(|args, _| async move {
                    let rows = args["rows"].as_i64().unwrap_or_default();
                    Ok(Value::Array((0..rows).map(|i| json!({ "row": i })).collect()))
                }),
        )
        .unwrap();

    let seen = Arc::clone(&secrets_seen);
    registry
        .register(
            ActionSpec::new("core", "hang")
                .secrets(["token"])
                .handler(move |_, ctx| {
                    let seen = Arc::clone(&seen);
                    async move {
                        *seen.lock().unwrap() = Some(ctx.secrets.clone());
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(Value::Null)
                    }
                }),
        )
        .unwrap();

    let store = Arc::new(MemoryResultStore::new());
    let executor = LocalExecutor::with_store(Arc::new(registry), store.clone());

    Harness {
        controller: ActionController::new(Arc::new(executor)),
        store,
        called,
        secrets_seen,
    }
}

fn input(ref_: &str, action: &str, args: Value) -> RunActionInput {
    RunActionInput::new(
        ActionStatement::new(ref_, action).with_args(args.as_object().cloned().unwrap()),
        RunContext::new("wf-abc", "wf-abc:exec-1"),
    )
}

fn expect_failure(result: Result<impl std::fmt::Debug, AttemptError>) -> ApplicationFailure {
    match result {
        Err(AttemptError::Failed(failure)) => failure,
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_memory_run_returns_raw_value() {
    let h = harness();
    let out = h
        .controller
        .run_action(&input("sum", "core.add", json!({ "a": 1, "b": 2 })), &Role::service(), &AttemptInfo::new(1))
        .await
        .unwrap();

    assert_eq!(out, json!(3));
}

#[tokio::test]
async fn test_domain_error_is_contextualized() {
    let h = harness();

    for retryable in [false, true] {
        let result = h
            .controller
            .run_action(
                &input("step1", "core.fail", json!({ "detail": "boom", "retryable": retryable })),
                &Role::service(),
                &AttemptInfo::new(1),
            )
            .await;
        let failure = expect_failure(result);

        assert!(failure.message.contains("[core.fail@step1] (Attempt 1)"));
        assert!(failure.message.contains("boom"));
        assert_eq!(failure.kind, ErrorKind::DomainActionError);
        assert_eq!(failure.is_retryable(), retryable);

        let details = failure.details.unwrap();
        assert_eq!(details.ref_, "step1");
        assert_eq!(details.attempt, 1);
        assert_eq!(details.kind, ErrorKind::DomainActionError);
    }
}

#[tokio::test]
async fn test_unexpected_error_is_fatal() {
    let h = harness();
    let result = h
        .controller
        .run_action(&input("step2", "core.crash", json!({})), &Role::service(), &AttemptInfo::new(2))
        .await;
    let failure = expect_failure(result);

    assert!(failure.non_retryable);
    assert_eq!(failure.kind, ErrorKind::UnknownError);
    assert!(failure
        .message
        .starts_with("[core.crash@step2] (Attempt 2)\n\nUnknownError occurred:\n"));
    assert!(failure.message.contains("disk on fire"));
}

#[tokio::test]
async fn test_pass_through_failure_uses_current_attempt() {
    let h = harness();
    let result = h
        .controller
        .run_action(&input("parent", "core.nested", json!({})), &Role::service(), &AttemptInfo::new(3))
        .await;
    let failure = expect_failure(result);

    assert!(failure.non_retryable);
    assert_eq!(failure.kind, ErrorKind::DomainActionError);
    assert!(failure.message.starts_with("[core.nested@parent] (Attempt 3)"));
    assert_eq!(failure.details.as_ref().unwrap().attempt, 3);

    let cause = failure.cause.unwrap();
    assert_eq!(cause.details.unwrap().attempt, 7);
}

#[tokio::test]
async fn test_registry_errors_are_classified() {
    let h = harness();

    let unknown = expect_failure(
        h.controller
            .run_action(&input("s", "core.missing", json!({})), &Role::service(), &AttemptInfo::new(1))
            .await,
    );
    assert_eq!(unknown.kind, ErrorKind::UnknownAction);
    assert!(unknown.non_retryable);

    let invalid = expect_failure(
        h.controller
            .run_action(&input("s", "core.add", json!({ "a": 1 })), &Role::service(), &AttemptInfo::new(1))
            .await,
    );
    assert_eq!(invalid.kind, ErrorKind::ArgsValidationFailed);
    assert!(!h.called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_start_delay_is_waited() {
    let h = harness();
    let task = ActionStatement::new("later", "core.add")
        .with_args(json!({ "a": 2, "b": 2 }).as_object().cloned().unwrap())
        .with_start_delay(0.05);
    let input = RunActionInput::new(task, RunContext::new("wf-abc", "wf-abc:exec-1"));

    let started = Instant::now();
    let out = h
        .controller
        .run_action(&input, &Role::service(), &AttemptInfo::new(1))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(out, json!(4));
}

#[tokio::test]
async fn test_cancel_during_delay_skips_implementation() {
    let h = harness();
    let task = ActionStatement::new("later", "core.add")
        .with_args(json!({ "a": 2, "b": 2 }).as_object().cloned().unwrap())
        .with_start_delay(10.0);
    let input = RunActionInput::new(task, RunContext::new("wf-abc", "wf-abc:exec-1"));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = h
        .controller
        .run_action(&input, &Role::service(), &AttemptInfo::with_cancel(1, token))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(err.failure().is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!h.called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancel_during_dispatch_releases_secrets() {
    let h = harness();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = h
        .controller
        .run_action(
            &input("wait", "core.hang", json!({})),
            &Role::service(),
            &AttemptInfo::with_cancel(1, token),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AttemptError::Cancelled { ref task_ref, attempt: 1 } if task_ref == "wait"));

    let secrets = h.secrets_seen.lock().unwrap().take().unwrap();
    assert!(!secrets.is_active());
    assert!(secrets.get("token").is_none());
}

#[tokio::test]
async fn test_store_mode_returns_pointer_only() {
    let h = harness();
    let step = input("load", "core.big", json!({ "rows": 500 }));

    let output = h
        .controller
        .run(&step, &Role::service(), &AttemptInfo::new(1), ResultsBackend::Store)
        .await
        .unwrap();

    let ActionOutput::Pointer(ptr) = output else {
        panic!("store mode must return a pointer");
    };
    assert_eq!(ptr.key, "wf-abc/exec-1/load.json");

    let wire = serde_json::to_string(&ActionOutput::Pointer(ptr.clone())).unwrap();
    assert!(!wire.contains("\"row\""));

    let stored = h.store.resolve(&ptr).await.unwrap();
    assert_eq!(stored.as_array().unwrap().len(), 500);
    assert_eq!(stored[499], json!({ "row": 499 }));
}

#[tokio::test]
async fn test_store_mode_failures_are_classified() {
    let h = harness();
    let result = h
        .controller
        .run_action_with_store(
            &input("step1", "core.fail", json!({ "detail": "boom", "retryable": true })),
            &Role::service(),
            &AttemptInfo::new(4),
        )
        .await;
    let failure = expect_failure(result);

    assert!(failure.message.contains("[core.fail@step1] (Attempt 4)"));
    assert!(failure.is_retryable());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_attempts_are_independent() {
    let h = Arc::new(harness());

    let mut handles = Vec::new();
    for i in 0..8i64 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.controller
                .run_action(
                    &input(&format!("s{i}"), "core.add", json!({ "a": i, "b": i })),
                    &Role::service(),
                    &AttemptInfo::new(1),
                )
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), json!(2 * i as i64));
    }
}
