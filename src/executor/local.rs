//! In-process execution client.
//!
//! Dispatches straight into an `ActionRegistry` and writes store-mode
//! results to a `ResultStore`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::domain::{ErrorKind, Role, RunActionInput};
use crate::registry::{ActionError, ActionRegistry, Invocation, InvokeError};

use super::store::{ActionResultHandle, MemoryResultStore, ResultStore, StoreError};
use super::{ActionFailure, ExecutionClient, ExecutorError, ValidationResponse};

/// Execution client that runs actions in this process
pub struct LocalExecutor {
    registry: Arc<ActionRegistry>,
    store: Arc<dyn ResultStore>,
}

impl LocalExecutor {
    /// Create a client with an in-memory result store
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self::with_store(registry, Arc::new(MemoryResultStore::new()))
    }

    pub fn with_store(registry: Arc<ActionRegistry>, store: Arc<dyn ResultStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn ResultStore> {
        Arc::clone(&self.store)
    }

    async fn invoke(&self, input: &RunActionInput, role: &Role) -> Result<Value, ExecutorError> {
        let invocation = Invocation::keyword(input.task.args.clone()).with_role(role.clone());
        self.registry
            .invoke(&input.task.action, invocation)
            .await
            .map_err(ExecutorError::from)
    }
}

impl From<InvokeError> for ExecutorError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Registry(e) => {
                ExecutorError::Action(ActionFailure::new(e.kind(), e.to_string(), false))
            }
            InvokeError::Sandbox { ref source, .. } => {
                let retryable = source.is_retryable();
                ExecutorError::Action(ActionFailure::new(
                    ErrorKind::DomainActionError,
                    err.to_string(),
                    retryable,
                ))
            }
            InvokeError::Action(ActionError::Domain { detail, retryable }) => {
                ExecutorError::Action(ActionFailure::new(ErrorKind::DomainActionError, detail, retryable))
            }
            InvokeError::Action(ActionError::Application(failure)) => {
                ExecutorError::Application(failure)
            }
            InvokeError::Action(ActionError::Unexpected(e)) => ExecutorError::Unexpected(e),
        }
    }
}

/// Store write failures: I/O and encoding are transient, bad keys are not
fn store_failure(err: StoreError) -> ExecutorError {
    let retryable = matches!(err, StoreError::Io { .. } | StoreError::Serde { .. });
    ExecutorError::Action(ActionFailure::new(
        ErrorKind::UnknownError,
        format!("Failed to store action result: {}", err),
        retryable,
    ))
}

#[async_trait]
impl ExecutionClient for LocalExecutor {
    async fn validate_action(
        &self,
        action_name: &str,
        args: &Map<String, Value>,
    ) -> Result<ValidationResponse, ExecutorError> {
        let action = match self.registry.get(action_name) {
            Ok(action) => action,
            Err(e) => return Ok(ValidationResponse::failure(action_name, e.to_string(), Vec::new())),
        };

        match action.args_schema.validate(args) {
            Ok(_) => Ok(ValidationResponse::success(action_name)),
            Err(issues) => Ok(ValidationResponse::failure(
                action_name,
                format!("Arguments for action '{}' are invalid", action_name),
                issues.iter().map(ToString::to_string).collect(),
            )),
        }
    }

    #[instrument(skip_all, fields(action = %input.task.action, task_ref = %input.task.ref_))]
    async fn run_action_memory_backend(
        &self,
        input: &RunActionInput,
        role: &Role,
    ) -> Result<Value, ExecutorError> {
        debug!("Running action in memory mode");
        self.invoke(input, role).await
    }

    #[instrument(skip_all, fields(action = %input.task.action, task_ref = %input.task.ref_))]
    async fn run_action_store_backend(
        &self,
        input: &RunActionInput,
        role: &Role,
    ) -> Result<ActionResultHandle, ExecutorError> {
        debug!("Running action in store mode");
        // The key must be valid before the action runs
        let handle = ActionResultHandle::new(&input.run_context.wf_exec_id, &input.task.ref_);
        let key = handle.to_path("json").map_err(store_failure)?;

        let result = self.invoke(input, role).await?;
        self.store
            .put_json(&key, &result)
            .await
            .map_err(store_failure)?;
        debug!(%key, "Stored action result");

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionStatement, RunContext};
    use crate::registry::{ActionSpec, ParamSpec, TypeTag};
    use serde_json::json;

    fn executor() -> LocalExecutor {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                ActionSpec::new("core", "double")
                    .param(ParamSpec::required("x", TypeTag::Int))
                    .handler(|args, _| async move {
                        Ok(json!(args["x"].as_i64().unwrap_or_default() * 2))
                    }),
            )
            .unwrap();
        LocalExecutor::new(Arc::new(registry))
    }

    fn input(args: Value) -> RunActionInput {
        RunActionInput::new(
            ActionStatement::new("double_it", "core.double")
                .with_args(args.as_object().cloned().unwrap()),
            RunContext::new("wf-1", "wf-1:exec-1"),
        )
    }

    #[tokio::test]
    async fn test_validate_action() {
        let executor = executor();

        let ok = executor
            .validate_action("core.double", json!({ "x": 2 }).as_object().unwrap())
            .await
            .unwrap();
        assert!(ok.ok);

        let bad = executor
            .validate_action("core.double", json!({ "x": "2" }).as_object().unwrap())
            .await
            .unwrap();
        assert!(!bad.ok);
        assert_eq!(bad.issues.len(), 1);

        let unknown = executor
            .validate_action("core.nope", &Map::new())
            .await
            .unwrap();
        assert!(!unknown.ok);
    }

    #[tokio::test]
    async fn test_store_backend_writes_result() {
        let executor = executor();
        let handle = executor
            .run_action_store_backend(&input(json!({ "x": 21 })), &Role::service())
            .await
            .unwrap();

        let ptr = handle.to_pointer().unwrap();
        assert_eq!(executor.store().resolve(&ptr).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_store_io_failure_is_retryable() {
        let temp = tempfile::TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let mut registry = ActionRegistry::new();
        crate::actions::register_builtins(&mut registry).unwrap();
        let executor = LocalExecutor::with_store(
            Arc::new(registry),
            Arc::new(crate::executor::FsResultStore::new(&blocker)),
        );
        let step = RunActionInput::new(
            ActionStatement::new("shape", "core.reshape").with_arg("value", json!(1)),
            RunContext::new("wf-1", "wf-1:exec-1"),
        );

        match executor.run_action_store_backend(&step, &Role::service()).await {
            Err(ExecutorError::Action(failure)) => {
                assert_eq!(failure.kind, ErrorKind::UnknownError);
                assert!(failure.retryable);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_execution_id_fails_before_dispatch() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let mut registry = ActionRegistry::new();
        registry
            .register(ActionSpec::new("core", "touch").handler(move |_, _| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(Value::Null) }
            }))
            .unwrap();
        let executor = LocalExecutor::new(Arc::new(registry));
        let step = RunActionInput::new(
            ActionStatement::new("t", "core.touch"),
            RunContext::new("wf-1", "no-separator"),
        );

        match executor.run_action_store_backend(&step, &Role::service()).await {
            Err(ExecutorError::Action(failure)) => assert!(!failure.retryable),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_registry_errors_map_to_action_failures() {
        let executor = executor();
        let err = executor
            .run_action_memory_backend(&input(json!({})), &Role::service())
            .await
            .unwrap_err();

        match err {
            ExecutorError::Action(failure) => {
                assert_eq!(failure.kind, ErrorKind::ArgsValidationFailed);
                assert!(!failure.retryable);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
