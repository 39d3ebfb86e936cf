//! Durable-executor history event shapes.
//!
//! These mirror the JSON export of an execution history: an ordered list of
//! typed events, each carrying the attributes block for its type. Payload
//! data is JSON text.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::HistoryError;

/// Event types the correlator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventHistoryType {
    WorkflowExecutionStarted,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
}

impl EventHistoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowExecutionStarted => "WORKFLOW_EXECUTION_STARTED",
            Self::WorkflowExecutionCompleted => "WORKFLOW_EXECUTION_COMPLETED",
            Self::WorkflowExecutionFailed => "WORKFLOW_EXECUTION_FAILED",
            Self::ActivityTaskScheduled => "ACTIVITY_TASK_SCHEDULED",
            Self::ActivityTaskStarted => "ACTIVITY_TASK_STARTED",
            Self::ActivityTaskCompleted => "ACTIVITY_TASK_COMPLETED",
            Self::ActivityTaskFailed => "ACTIVITY_TASK_FAILED",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ActivityTaskFailed | Self::WorkflowExecutionFailed)
    }
}

impl std::fmt::Display for EventHistoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encoded value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// JSON text
    pub data: String,
}

impl Payload {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let mut metadata = BTreeMap::new();
        metadata.insert("encoding".to_string(), "json/plain".to_string());
        Ok(Self {
            metadata,
            data: serde_json::to_string(value)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payloads {
    #[serde(default)]
    pub payloads: Vec<Payload>,
}

impl Payloads {
    pub fn single<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payloads: vec![Payload::json(value)?],
        })
    }

    /// Decode the only entry; zero or several entries are an error
    pub fn decode_single<T: DeserializeOwned>(&self) -> Result<T, HistoryError> {
        match self.payloads.as_slice() {
            [] => Err(HistoryError::MissingPayload),
            [payload] => Ok(payload.decode()?),
            many => Err(HistoryError::AmbiguousPayload(many.len())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationFailureInfo {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub non_retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Payloads>,
}

/// Failure record as persisted by the durable executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    #[serde(default)]
    pub stack_trace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Failure>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_failure_info: Option<ApplicationFailureInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionStartedEventAttributes {
    #[serde(default)]
    pub workflow_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Payloads>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionCompletedEventAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payloads>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionFailedEventAttributes {
    pub failure: Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTaskScheduledEventAttributes {
    #[serde(default)]
    pub activity_id: String,
    #[serde(default)]
    pub activity_type: String,
    #[serde(default)]
    pub input: Payloads,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTaskStartedEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
}

fn default_attempt() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTaskCompletedEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payloads>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTaskFailedEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    pub failure: Failure,
}

/// One entry of an execution history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub event_time: DateTime<Utc>,
    pub event_type: EventHistoryType,
    #[serde(default)]
    pub task_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution_started_event_attributes: Option<WorkflowExecutionStartedEventAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution_completed_event_attributes:
        Option<WorkflowExecutionCompletedEventAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution_failed_event_attributes: Option<WorkflowExecutionFailedEventAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_task_scheduled_event_attributes: Option<ActivityTaskScheduledEventAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_task_started_event_attributes: Option<ActivityTaskStartedEventAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_task_completed_event_attributes: Option<ActivityTaskCompletedEventAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_task_failed_event_attributes: Option<ActivityTaskFailedEventAttributes>,
}

impl HistoryEvent {
    /// Bare event without attributes
    pub fn new(event_id: i64, event_type: EventHistoryType) -> Self {
        Self {
            event_id,
            event_time: Utc::now(),
            event_type,
            task_id: 0,
            workflow_execution_started_event_attributes: None,
            workflow_execution_completed_event_attributes: None,
            workflow_execution_failed_event_attributes: None,
            activity_task_scheduled_event_attributes: None,
            activity_task_started_event_attributes: None,
            activity_task_completed_event_attributes: None,
            activity_task_failed_event_attributes: None,
        }
    }

    pub fn activity_scheduled(event_id: i64, attrs: ActivityTaskScheduledEventAttributes) -> Self {
        Self {
            activity_task_scheduled_event_attributes: Some(attrs),
            ..Self::new(event_id, EventHistoryType::ActivityTaskScheduled)
        }
    }

    pub fn activity_started(event_id: i64, scheduled_event_id: i64, attempt: u32) -> Self {
        Self {
            activity_task_started_event_attributes: Some(ActivityTaskStartedEventAttributes {
                scheduled_event_id,
                attempt,
            }),
            ..Self::new(event_id, EventHistoryType::ActivityTaskStarted)
        }
    }

    pub fn activity_completed(event_id: i64, scheduled_event_id: i64, result: Option<Payloads>) -> Self {
        Self {
            activity_task_completed_event_attributes: Some(ActivityTaskCompletedEventAttributes {
                scheduled_event_id,
                started_event_id: 0,
                result,
            }),
            ..Self::new(event_id, EventHistoryType::ActivityTaskCompleted)
        }
    }

    pub fn activity_failed(event_id: i64, scheduled_event_id: i64, failure: Failure) -> Self {
        Self {
            activity_task_failed_event_attributes: Some(ActivityTaskFailedEventAttributes {
                scheduled_event_id,
                started_event_id: 0,
                failure,
            }),
            ..Self::new(event_id, EventHistoryType::ActivityTaskFailed)
        }
    }

    pub fn workflow_failed(event_id: i64, failure: Failure) -> Self {
        Self {
            workflow_execution_failed_event_attributes: Some(WorkflowExecutionFailedEventAttributes {
                failure,
            }),
            ..Self::new(event_id, EventHistoryType::WorkflowExecutionFailed)
        }
    }

    /// The scheduled event this activity event belongs to
    pub fn scheduled_event_id(&self) -> Option<i64> {
        match self.event_type {
            EventHistoryType::ActivityTaskScheduled => Some(self.event_id),
            EventHistoryType::ActivityTaskStarted => self
                .activity_task_started_event_attributes
                .as_ref()
                .map(|a| a.scheduled_event_id),
            EventHistoryType::ActivityTaskCompleted => self
                .activity_task_completed_event_attributes
                .as_ref()
                .map(|a| a.scheduled_event_id),
            EventHistoryType::ActivityTaskFailed => self
                .activity_task_failed_event_attributes
                .as_ref()
                .map(|a| a.scheduled_event_id),
            _ => None,
        }
    }

    /// The failure record of a failure-kind event
    pub fn failure(&self) -> Result<&Failure, HistoryError> {
        match self.event_type {
            EventHistoryType::ActivityTaskFailed => self
                .activity_task_failed_event_attributes
                .as_ref()
                .map(|a| &a.failure)
                .ok_or(HistoryError::MissingAttributes(self.event_type)),
            EventHistoryType::WorkflowExecutionFailed => self
                .workflow_execution_failed_event_attributes
                .as_ref()
                .map(|a| &a.failure)
                .ok_or(HistoryError::MissingAttributes(self.event_type)),
            other => Err(HistoryError::UnsupportedEventKind(other)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryFile {
    Wrapped { events: Vec<HistoryEvent> },
    Bare(Vec<HistoryEvent>),
}

/// An ordered execution history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub events: Vec<HistoryEvent>,
}

impl History {
    /// Parse a history export: `{"events": [...]}` or a bare array
    pub fn from_json(content: &str) -> Result<Self, HistoryError> {
        let events = match serde_json::from_str::<HistoryFile>(content)? {
            HistoryFile::Wrapped { events } | HistoryFile::Bare(events) => events,
        };
        Ok(Self { events })
    }
}
