//! Execution-history correlator.
//!
//! Rebuilds, from an execution's append-only event history, which step
//! produced which result or failure. The step identity is re-derived from the
//! `RunActionInput` recorded in the scheduled event's input payload.
//!
//! Every function here is a pure function of its input events.

pub mod events;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::domain::{ApplicationFailure, RunActionInput};

pub use events::{
    ApplicationFailureInfo, EventHistoryType, Failure, History, HistoryEvent, Payload, Payloads,
};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Event type {0} is not supported here")]
    UnsupportedEventKind(EventHistoryType),

    #[error("Event of type {0} has no attributes block")]
    MissingAttributes(EventHistoryType),

    #[error("Recorded input has no payload")]
    MissingPayload,

    #[error("Recorded input has {0} payloads, expected exactly one")]
    AmbiguousPayload(usize),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Split an action key on its last `.` into `(namespace, name)`
pub fn split_action_key(key: &str) -> (&str, &str) {
    key.rsplit_once('.').unwrap_or(("", key))
}

/// A scheduled step and, once correlated, its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGroup {
    pub event_id: i64,
    pub namespace: String,
    pub action_name: String,
    pub action_key: String,
    pub action_id: Option<String>,
    pub action_ref: String,
    pub action_title: String,
    pub action_description: String,
    pub action_input: RunActionInput,
    #[serde(default)]
    pub action_result: Option<Value>,
}

impl EventGroup {
    /// Derive the group from an `ACTIVITY_TASK_SCHEDULED` event
    pub fn from_scheduled_activity(event: &HistoryEvent) -> Result<Self, HistoryError> {
        if event.event_type != EventHistoryType::ActivityTaskScheduled {
            return Err(HistoryError::UnsupportedEventKind(event.event_type));
        }
        let attrs = event
            .activity_task_scheduled_event_attributes
            .as_ref()
            .ok_or(HistoryError::MissingAttributes(event.event_type))?;

        let action_input: RunActionInput = attrs.input.decode_single()?;
        let task = &action_input.task;
        let (namespace, action_name) = split_action_key(&task.action);

        Ok(Self {
            event_id: event.event_id,
            namespace: namespace.to_string(),
            action_name: action_name.to_string(),
            action_key: task.action.clone(),
            action_id: task.id.clone(),
            action_ref: task.ref_.clone(),
            action_title: task.title.clone(),
            action_description: task.description.clone(),
            action_input,
            action_result: None,
        })
    }
}

/// Failure details pulled from a failure-kind event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFailure {
    pub message: String,
    pub stack_trace: String,
    #[serde(default)]
    pub cause: Option<Value>,
    #[serde(default)]
    pub application_failure_info: Map<String, Value>,
}

impl EventFailure {
    /// Derive from an `ACTIVITY_TASK_FAILED` or `WORKFLOW_EXECUTION_FAILED` event
    pub fn from_history_event(event: &HistoryEvent) -> Result<Self, HistoryError> {
        let failure = event.failure()?;

        let cause = failure
            .cause
            .as_deref()
            .map(serde_json::to_value)
            .transpose()?;
        let application_failure_info = match &failure.application_failure_info {
            Some(info) => match serde_json::to_value(info)? {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };

        Ok(Self {
            message: failure.message.clone(),
            stack_trace: failure.stack_trace.clone(),
            cause,
            application_failure_info,
        })
    }
}

impl ApplicationFailure {
    /// The failure record the durable executor persists for this failure
    pub fn to_history_failure(&self) -> Result<Failure, serde_json::Error> {
        let details = self.details.as_ref().map(Payloads::single).transpose()?;
        let cause = self
            .cause
            .as_deref()
            .map(ApplicationFailure::to_history_failure)
            .transpose()?
            .map(Box::new);

        Ok(Failure {
            message: self.message.clone(),
            stack_trace: String::new(),
            cause,
            application_failure_info: Some(ApplicationFailureInfo {
                type_: self.kind.to_string(),
                non_retryable: self.non_retryable,
                details,
            }),
        })
    }
}

/// One event of a correlated history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHistoryEntry {
    pub event_id: i64,
    pub event_time: DateTime<Utc>,
    pub event_type: EventHistoryType,
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_group: Option<EventGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<EventFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl EventHistoryEntry {
    fn bare(event: &HistoryEvent) -> Self {
        Self {
            event_id: event.event_id,
            event_time: event.event_time,
            event_type: event.event_type,
            task_id: event.task_id,
            event_group: None,
            failure: None,
            result: None,
        }
    }
}

/// Correlate a whole history in event order
///
/// Activity events are linked to their scheduled event through
/// `scheduled_event_id`. A completed activity sets `action_result` on its
/// group. Events that cannot be decoded are kept without correlation data.
pub fn correlate(events: &[HistoryEvent]) -> Vec<EventHistoryEntry> {
    let mut groups: HashMap<i64, EventGroup> = HashMap::new();
    let mut entries = Vec::with_capacity(events.len());

    for event in events {
        let mut entry = EventHistoryEntry::bare(event);

        match event.event_type {
            EventHistoryType::ActivityTaskScheduled => match EventGroup::from_scheduled_activity(event) {
                Ok(group) => {
                    groups.insert(event.event_id, group.clone());
                    entry.event_group = Some(group);
                }
                Err(e) => warn!(event_id = event.event_id, error = %e, "Could not derive event group"),
            },
            EventHistoryType::ActivityTaskStarted => {
                entry.event_group = lookup(&groups, event);
            }
            EventHistoryType::ActivityTaskCompleted => {
                let result = event
                    .activity_task_completed_event_attributes
                    .as_ref()
                    .and_then(|a| a.result.as_ref())
                    .map(Payloads::decode_single::<Value>)
                    .transpose();
                match result {
                    Ok(result) => {
                        if let Some(group) = event
                            .scheduled_event_id()
                            .and_then(|id| groups.get_mut(&id))
                        {
                            group.action_result = result.clone();
                        }
                        entry.result = result;
                    }
                    Err(e) => warn!(event_id = event.event_id, error = %e, "Could not decode activity result"),
                }
                entry.event_group = lookup(&groups, event);
            }
            EventHistoryType::ActivityTaskFailed | EventHistoryType::WorkflowExecutionFailed => {
                match EventFailure::from_history_event(event) {
                    Ok(failure) => entry.failure = Some(failure),
                    Err(e) => warn!(event_id = event.event_id, error = %e, "Could not derive event failure"),
                }
                entry.event_group = lookup(&groups, event);
            }
            EventHistoryType::WorkflowExecutionCompleted => {
                let result = event
                    .workflow_execution_completed_event_attributes
                    .as_ref()
                    .and_then(|a| a.result.as_ref())
                    .map(Payloads::decode_single::<Value>)
                    .transpose();
                match result {
                    Ok(result) => entry.result = result,
                    Err(e) => warn!(event_id = event.event_id, error = %e, "Could not decode workflow result"),
                }
            }
            EventHistoryType::WorkflowExecutionStarted => {}
        }

        entries.push(entry);
    }

    entries
}

fn lookup(groups: &HashMap<i64, EventGroup>, event: &HistoryEvent) -> Option<EventGroup> {
    event
        .scheduled_event_id()
        .and_then(|id| groups.get(&id))
        .cloned()
}
