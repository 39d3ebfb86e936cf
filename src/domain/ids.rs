//! Workflow execution id helpers.
//!
//! Ids are generated upstream. A full execution id has the form
//! `<wf_id>:<exec_suffix>`, e.g. `wf-77932a0b...:exec-140a425a...`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid workflow execution id: {0:?} (expected '<wf_id>:<exec_suffix>')")]
pub struct InvalidExecutionId(pub String);

/// Split a workflow execution id into `(wf_id, exec_suffix)`
pub fn exec_id_to_parts(wf_exec_id: &str) -> Result<(&str, &str), InvalidExecutionId> {
    match wf_exec_id.split_once(':') {
        Some((wf_id, suffix))
            if !wf_id.is_empty() && !suffix.is_empty() && !wf_id.contains('/') && !suffix.contains('/') =>
        {
            Ok((wf_id, suffix))
        }
        _ => Err(InvalidExecutionId(wf_exec_id.to_string())),
    }
}

/// Join a workflow id and an execution suffix
pub fn exec_id_from_parts(wf_id: &str, exec_suffix: &str) -> String {
    format!("{}:{}", wf_id, exec_suffix)
}
