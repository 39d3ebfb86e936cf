//! Domain types for the actionflow core.
//!
//! This module contains the core data structures:
//! - Statement: workflow steps and per-attempt input
//! - Role: caller identity
//! - Failure: structured error payloads and the closed error-kind set
//! - Ids: workflow execution id helpers

pub mod failure;
pub mod ids;
pub mod role;
pub mod statement;

// Re-export commonly used types
pub use failure::{ApplicationFailure, DslTaskErrorInfo, ErrorKind};
pub use ids::{exec_id_from_parts, exec_id_to_parts, InvalidExecutionId};
pub use role::{Role, RoleType};
pub use statement::{ActionStatement, RetryPolicy, RunActionInput, RunContext};
