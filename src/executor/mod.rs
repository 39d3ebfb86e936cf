//! Execution-client boundary.
//!
//! The invocation controller never calls actions directly. It goes through an
//! `ExecutionClient`, which in production transports the input to a remote
//! executor process. `LocalExecutor` is the in-process client used by the
//! CLI and tests.

pub mod local;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{ApplicationFailure, ErrorKind, Role, RunActionInput};

pub use local::LocalExecutor;
pub use store::{
    ActionResultHandle, FsResultStore, MemoryResultStore, ResultStore, StoreError, StoreObjectPtr,
};

/// Where a run's result ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsBackend {
    /// The raw result value is returned inline
    Memory,
    /// The result is written to the result store and a pointer is returned
    Store,
}

impl Default for ResultsBackend {
    fn default() -> Self {
        Self::Memory
    }
}

impl ResultsBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Store => "store",
        }
    }
}

impl std::fmt::Display for ResultsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResultsBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "store" => Ok(Self::Store),
            other => anyhow::bail!("Unknown results backend '{}': expected memory or store", other),
        }
    }
}

/// Outcome of validating an action's arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub ok: bool,
    pub action: String,
    pub message: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl ValidationResponse {
    pub fn success(action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            ok: true,
            message: format!("Arguments for action '{}' are valid", action),
            action,
            issues: Vec::new(),
        }
    }

    pub fn failure(action: impl Into<String>, message: impl Into<String>, issues: Vec<String>) -> Self {
        Self {
            ok: false,
            action: action.into(),
            message: message.into(),
            issues,
        }
    }
}

/// An error the action (or the registry in front of it) raised on purpose
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the action asked to be retried
    pub retryable: bool,
}

impl ActionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

/// Errors surfacing from an execution client
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Domain or registry error with an explicit retry intent
    #[error(transparent)]
    Action(#[from] ActionFailure),

    /// Structured failure from a nested boundary
    #[error(transparent)]
    Application(#[from] ApplicationFailure),

    /// Anything else
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// What the controller consumes to dispatch an action
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Validate arguments without running the action
    async fn validate_action(
        &self,
        action_name: &str,
        args: &Map<String, Value>,
    ) -> Result<ValidationResponse, ExecutorError>;

    /// Run and return the raw result
    async fn run_action_memory_backend(
        &self,
        input: &RunActionInput,
        role: &Role,
    ) -> Result<Value, ExecutorError>;

    /// Run, store the result and return a handle to it
    async fn run_action_store_backend(
        &self,
        input: &RunActionInput,
        role: &Role,
    ) -> Result<ActionResultHandle, ExecutorError>;
}
