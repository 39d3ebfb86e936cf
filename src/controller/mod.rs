//! Action invocation controller.
//!
//! Runs one attempt of one workflow step on behalf of the durable executor:
//!
//! ```text
//! Pending -> Delaying (optional) -> Dispatching -> Succeeded
//!                                              \-> Failed(retryable | fatal)
//! ```
//!
//! The controller never retries. Every failure leaves as an
//! `ApplicationFailure` whose `non_retryable` flag tells the durable executor
//! what to do next. Cancellation through the attempt's token is reported as
//! `AttemptError::Cancelled`, never as a failure.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::domain::{
    ActionStatement, ApplicationFailure, DslTaskErrorInfo, ErrorKind, Role, RunActionInput,
};
use crate::executor::{
    ExecutionClient, ExecutorError, ResultsBackend, StoreObjectPtr, ValidationResponse,
};

/// Per-attempt metadata supplied by the durable executor
#[derive(Debug, Clone)]
pub struct AttemptInfo {
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Fired when the executor cancels or times out this attempt
    pub cancel: CancellationToken,
}

impl AttemptInfo {
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt: attempt.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Attempt driven by an externally owned token
    pub fn with_cancel(attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            attempt: attempt.max(1),
            cancel,
        }
    }
}

impl Default for AttemptInfo {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Local diagnostic bindings for one attempt
///
/// Only used for logging and failure messages. It carries no invocation
/// semantics and is rebuilt for every attempt.
#[derive(Debug, Clone)]
pub struct DiagnosticContext {
    pub task_ref: String,
    pub action: String,
    pub wf_id: String,
    pub environment: String,
    pub role: Role,
    pub attempt: u32,
}

impl DiagnosticContext {
    pub fn new(input: &RunActionInput, role: &Role, attempt: u32) -> Self {
        Self {
            task_ref: input.task.ref_.clone(),
            action: input.task.action.clone(),
            wf_id: input.run_context.wf_id.clone(),
            environment: input.run_context.environment.clone(),
            role: role.clone(),
            attempt,
        }
    }

    pub fn span(&self) -> Span {
        info_span!(
            "run_action",
            task_ref = %self.task_ref,
            action = %self.action,
            wf_id = %self.wf_id,
            environment = %self.environment,
            role = %self.role,
            attempt = self.attempt,
        )
    }

    /// `[<action>@<ref>] (Attempt <n>)`
    pub fn locator(&self) -> String {
        format!("[{}@{}] (Attempt {})", self.action, self.task_ref, self.attempt)
    }

    /// Prefix a message with the attempt locator
    pub fn contextualize(&self, msg: &str) -> String {
        format!("{}\n\n{}", self.locator(), msg)
    }

    fn failure(
        &self,
        kind: ErrorKind,
        msg: &str,
        non_retryable: bool,
        cause: Option<ApplicationFailure>,
    ) -> ApplicationFailure {
        let failure = ApplicationFailure::new(kind, self.contextualize(msg))
            .non_retryable(non_retryable)
            .with_details(DslTaskErrorInfo {
                ref_: self.task_ref.clone(),
                message: msg.to_string(),
                kind,
                attempt: self.attempt,
            });
        match cause {
            Some(cause) => failure.with_cause(cause),
            None => failure,
        }
    }

    /// Map a client error onto the structured failure the executor sees
    pub fn classify(&self, err: ExecutorError) -> ApplicationFailure {
        match err {
            ExecutorError::Action(failure) => {
                error!(
                    kind = %failure.kind,
                    retryable = failure.retryable,
                    detail = %failure.message,
                    "Action error occurred"
                );
                self.failure(failure.kind, &failure.message, !failure.retryable, None)
            }
            ExecutorError::Application(nested) => {
                error!(
                    kind = %nested.kind,
                    non_retryable = nested.non_retryable,
                    error = %nested.message,
                    "Application failure occurred"
                );
                let msg = nested.message.clone();
                self.failure(nested.kind, &msg, nested.non_retryable, Some(nested))
            }
            ExecutorError::Unexpected(e) => {
                let msg = format!("{} occurred:\n{:#}", ErrorKind::UnknownError, e);
                error!(error = %msg, "Unexpected error occurred");
                self.failure(ErrorKind::UnknownError, &msg, true, None)
            }
        }
    }
}

/// How an attempt ended when it did not succeed
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Failed(ApplicationFailure),

    #[error("Attempt {attempt} of '{task_ref}' was cancelled")]
    Cancelled { task_ref: String, attempt: u32 },
}

impl AttemptError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AttemptError::Cancelled { .. })
    }

    /// The surfaced failure, unless the attempt was cancelled
    pub fn failure(&self) -> Option<&ApplicationFailure> {
        match self {
            AttemptError::Failed(failure) => Some(failure),
            AttemptError::Cancelled { .. } => None,
        }
    }
}

/// Successful attempt output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ActionOutput {
    /// Raw result (memory backend)
    Value(Value),
    /// Reference to a stored result (store backend)
    Pointer(StoreObjectPtr),
}

/// Input of the validate operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateActionInput {
    pub role: Role,
    pub task: ActionStatement,
}

/// Runs single attempts through an execution client
#[derive(Clone)]
pub struct ActionController {
    client: Arc<dyn ExecutionClient>,
}

impl ActionController {
    pub fn new(client: Arc<dyn ExecutionClient>) -> Self {
        Self { client }
    }

    /// Validate a step's arguments through the client
    pub async fn validate_action(
        &self,
        input: &ValidateActionInput,
    ) -> Result<ValidationResponse, ExecutorError> {
        info!(action = %input.task.action, task_ref = %input.task.ref_, "Validating action");
        self.client
            .validate_action(&input.task.action, &input.task.args)
            .await
    }

    /// Run one attempt in memory mode and return the raw result
    pub async fn run_action(
        &self,
        input: &RunActionInput,
        role: &Role,
        attempt: &AttemptInfo,
    ) -> Result<Value, AttemptError> {
        let ctx = DiagnosticContext::new(input, role, attempt.attempt);
        let span = ctx.span();

        async {
            self.begin(input, attempt, &ctx).await?;
            let dispatched = race(
                attempt,
                &ctx,
                self.client.run_action_memory_backend(input, role),
            )
            .await?;
            dispatched.map_err(|e| AttemptError::Failed(ctx.classify(e)))
        }
        .instrument(span)
        .await
    }

    /// Run one attempt in store mode and return only a pointer to the result
    pub async fn run_action_with_store(
        &self,
        input: &RunActionInput,
        role: &Role,
        attempt: &AttemptInfo,
    ) -> Result<StoreObjectPtr, AttemptError> {
        let ctx = DiagnosticContext::new(input, role, attempt.attempt);
        let span = ctx.span();

        async {
            self.begin(input, attempt, &ctx).await?;
            let dispatched = race(
                attempt,
                &ctx,
                self.client.run_action_store_backend(input, role),
            )
            .await?;
            let handle = dispatched.map_err(|e| AttemptError::Failed(ctx.classify(e)))?;

            handle
                .to_pointer()
                .map_err(|e| AttemptError::Failed(ctx.classify(ExecutorError::Unexpected(e.into()))))
        }
        .instrument(span)
        .await
    }

    /// Run one attempt with the given backend
    pub async fn run(
        &self,
        input: &RunActionInput,
        role: &Role,
        attempt: &AttemptInfo,
        backend: ResultsBackend,
    ) -> Result<ActionOutput, AttemptError> {
        match backend {
            ResultsBackend::Memory => self
                .run_action(input, role, attempt)
                .await
                .map(ActionOutput::Value),
            ResultsBackend::Store => self
                .run_action_with_store(input, role, attempt)
                .await
                .map(ActionOutput::Pointer),
        }
    }

    /// Log the attempt and wait out the start delay
    async fn begin(
        &self,
        input: &RunActionInput,
        attempt: &AttemptInfo,
        ctx: &DiagnosticContext,
    ) -> Result<(), AttemptError> {
        info!(
            max_attempts = input.task.retry_policy.max_attempts,
            timeout = input.task.retry_policy.timeout,
            "Run action attempt"
        );

        let Some(delay) = input.task.start_delay() else {
            return Ok(());
        };
        info!(delay_secs = delay.as_secs_f64(), "Starting action with delay");

        tokio::select! {
            biased;
            _ = attempt.cancel.cancelled() => {
                warn!("Attempt cancelled during start delay");
                Err(cancelled(ctx))
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Drive `fut` unless the attempt is cancelled first
async fn race<F, T>(attempt: &AttemptInfo, ctx: &DiagnosticContext, fut: F) -> Result<T, AttemptError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = attempt.cancel.cancelled() => {
            warn!("Attempt cancelled during dispatch");
            Err(cancelled(ctx))
        }
        out = fut => Ok(out),
    }
}

fn cancelled(ctx: &DiagnosticContext) -> AttemptError {
    AttemptError::Cancelled {
        task_ref: ctx.task_ref.clone(),
        attempt: ctx.attempt,
    }
}
