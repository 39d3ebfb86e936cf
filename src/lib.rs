//! actionflow - execution core of a workflow-automation engine
//!
//! Runs user-defined actions as steps of a durable, retryable workflow. The
//! durable executor itself (timers, retries, history storage) is external;
//! this crate provides what it calls into and what it reads back.
//!
//! # Architecture
//!
//! - Actions are registered once at startup into an `ActionRegistry` with a
//!   declared parameter list, from which a strict argument schema is derived
//! - Every call is keyword-only, schema-validated and runs inside a
//!   per-invocation secret sandbox
//! - The `ActionController` runs one attempt of one step through an
//!   `ExecutionClient`, applies the start delay and turns every failure into
//!   a structured, locator-prefixed `ApplicationFailure`
//! - The `history` correlator rebuilds step identity and outcome from the
//!   executor's event history
//!
//! # Modules
//!
//! - `domain`: Data structures (ActionStatement, RunActionInput, Role, failures)
//! - `registry`: Action registry, schema deriver, secret sandbox
//! - `executor`: Execution-client boundary and result store
//! - `controller`: Per-attempt invocation controller
//! - `history`: Execution-history correlator
//! - `actions`: Built-in actions
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # List schemas of the built-in actions
//! actionflow schemas --filter "core.*"
//!
//! # Run one step and store its result
//! actionflow run step.yaml --backend store
//!
//! # Correlate an execution history
//! actionflow history events.json --failures-only
//! ```

pub mod actions;
pub mod cli;
pub mod config;
pub mod controller;
pub mod domain;
pub mod executor;
pub mod history;
pub mod registry;

// Re-export main types at crate root for convenience
pub use controller::{ActionController, ActionOutput, AttemptError, AttemptInfo};
pub use domain::{
    ActionStatement, ApplicationFailure, DslTaskErrorInfo, ErrorKind, Role, RunActionInput,
    RunContext,
};
pub use executor::{ExecutionClient, ExecutorError, LocalExecutor, ResultsBackend};
pub use history::{correlate, EventFailure, EventGroup, EventHistoryEntry, HistoryEvent};
pub use registry::{ActionRegistry, ActionSpec, Invocation, ParamSpec, TypeTag};
