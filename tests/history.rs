//! History Correlator Integration Tests
//!
//! Derivation of event groups and failures from recorded history events.

use actionflow::controller::DiagnosticContext;
use actionflow::domain::{ActionStatement, ErrorKind, Role, RunActionInput, RunContext};
use actionflow::executor::{ActionFailure, ExecutorError};
use actionflow::history::events::ActivityTaskScheduledEventAttributes;
use actionflow::history::{
    correlate, EventFailure, EventGroup, EventHistoryType, History, HistoryError, HistoryEvent,
    Payload, Payloads,
};
use serde_json::json;

fn slack_input() -> RunActionInput {
    RunActionInput::new(
        ActionStatement::new("notify", "integrations.slack.post_message")
            .with_title("Notify channel")
            .with_arg("channel", json!("#alerts")),
        RunContext::new("wf-abc", "wf-abc:exec-1").with_environment("prod"),
    )
}

fn scheduled(event_id: i64, input: &RunActionInput) -> HistoryEvent {
    HistoryEvent::activity_scheduled(
        event_id,
        ActivityTaskScheduledEventAttributes {
            activity_id: event_id.to_string(),
            activity_type: "run_action_activity".to_string(),
            input: Payloads::single(input).unwrap(),
        },
    )
}

fn domain_failure(attempt: u32) -> actionflow::domain::ApplicationFailure {
    let input = slack_input();
    DiagnosticContext::new(&input, &Role::service(), attempt).classify(ExecutorError::Action(
        ActionFailure::new(ErrorKind::DomainActionError, "channel not found", false),
    ))
}

#[test]
fn test_group_splits_namespace_on_last_dot() {
    let input = slack_input();
    let group = EventGroup::from_scheduled_activity(&scheduled(5, &input)).unwrap();

    assert_eq!(group.namespace, "integrations.slack");
    assert_eq!(group.action_name, "post_message");
    assert_eq!(group.action_key, "integrations.slack.post_message");
    assert_eq!(group.action_ref, "notify");
    assert_eq!(group.action_title, "Notify channel");
    assert_eq!(group.action_input, input);
    assert!(group.action_result.is_none());
}

#[test]
fn test_workflow_started_is_unsupported() {
    let event = HistoryEvent::new(1, EventHistoryType::WorkflowExecutionStarted);

    assert!(matches!(
        EventGroup::from_scheduled_activity(&event),
        Err(HistoryError::UnsupportedEventKind(EventHistoryType::WorkflowExecutionStarted))
    ));
    assert!(matches!(
        EventFailure::from_history_event(&event),
        Err(HistoryError::UnsupportedEventKind(EventHistoryType::WorkflowExecutionStarted))
    ));
}

#[test]
fn test_scheduled_event_is_not_a_failure() {
    let event = scheduled(5, &slack_input());
    assert!(matches!(
        EventFailure::from_history_event(&event),
        Err(HistoryError::UnsupportedEventKind(_))
    ));
}

#[test]
fn test_payload_count_must_be_one() {
    let mut event = scheduled(5, &slack_input());
    let attrs = event.activity_task_scheduled_event_attributes.as_mut().unwrap();
    attrs.input.payloads.push(Payload::json(&Role::service()).unwrap());

    assert!(matches!(
        EventGroup::from_scheduled_activity(&event),
        Err(HistoryError::AmbiguousPayload(2))
    ));

    let attrs = event.activity_task_scheduled_event_attributes.as_mut().unwrap();
    attrs.input.payloads.clear();
    assert!(matches!(
        EventGroup::from_scheduled_activity(&event),
        Err(HistoryError::MissingPayload)
    ));
}

#[test]
fn test_undecodable_payload() {
    let mut event = scheduled(5, &slack_input());
    let attrs = event.activity_task_scheduled_event_attributes.as_mut().unwrap();
    attrs.input.payloads[0].data = "{not json".to_string();

    assert!(matches!(
        EventGroup::from_scheduled_activity(&event),
        Err(HistoryError::Decode(_))
    ));
}

#[test]
fn test_derivation_is_idempotent() {
    let input = slack_input();
    let scheduled = scheduled(5, &input);
    let failed = HistoryEvent::activity_failed(7, 5, domain_failure(1).to_history_failure().unwrap());

    assert_eq!(
        EventGroup::from_scheduled_activity(&scheduled).unwrap(),
        EventGroup::from_scheduled_activity(&scheduled).unwrap()
    );
    assert_eq!(
        EventFailure::from_history_event(&failed).unwrap(),
        EventFailure::from_history_event(&failed).unwrap()
    );
}

#[test]
fn test_controller_failure_reads_back() {
    let failure = domain_failure(2);
    let event = HistoryEvent::activity_failed(7, 5, failure.to_history_failure().unwrap());

    let derived = EventFailure::from_history_event(&event).unwrap();

    assert_eq!(derived.message, failure.message);
    assert!(derived.message.starts_with("[integrations.slack.post_message@notify] (Attempt 2)"));
    assert_eq!(derived.application_failure_info["type"], "DomainActionError");
    assert_eq!(derived.application_failure_info["non_retryable"], true);
    assert!(derived.cause.is_none());

    let details: Payloads =
        serde_json::from_value(derived.application_failure_info["details"].clone()).unwrap();
    let info: actionflow::domain::DslTaskErrorInfo = details.decode_single().unwrap();
    assert_eq!(info.attempt, 2);
    assert_eq!(info.ref_, "notify");
}

#[test]
fn test_workflow_failure_with_cause() {
    let activity = domain_failure(1).to_history_failure().unwrap();
    let mut workflow = activity.clone();
    workflow.message = "Workflow failed".to_string();
    workflow.cause = Some(Box::new(activity));

    let derived = EventFailure::from_history_event(&HistoryEvent::workflow_failed(9, workflow)).unwrap();

    assert_eq!(derived.message, "Workflow failed");
    let cause = derived.cause.unwrap();
    assert!(cause["message"]
        .as_str()
        .unwrap()
        .contains("channel not found"));
    assert!(cause.get("stack_trace").is_some());
    assert!(cause.get("stackTrace").is_none());
    assert_eq!(cause["application_failure_info"]["non_retryable"], true);
}

#[test]
fn test_correlate_full_history() {
    let ok_input = RunActionInput::new(
        ActionStatement::new("reshape", "core.reshape").with_arg("value", json!(1)),
        RunContext::new("wf-abc", "wf-abc:exec-1"),
    );
    let events = vec![
        HistoryEvent::new(1, EventHistoryType::WorkflowExecutionStarted),
        scheduled(5, &ok_input),
        HistoryEvent::activity_started(6, 5, 1),
        HistoryEvent::activity_completed(7, 5, Some(Payloads::single(&json!(1)).unwrap())),
        scheduled(8, &slack_input()),
        HistoryEvent::activity_started(9, 8, 1),
        HistoryEvent::activity_failed(10, 8, domain_failure(1).to_history_failure().unwrap()),
    ];

    let entries = correlate(&events);
    assert_eq!(entries.len(), events.len());

    assert!(entries[0].event_group.is_none());
    assert_eq!(entries[3].result, Some(json!(1)));
    assert_eq!(entries[3].event_group.as_ref().unwrap().action_result, Some(json!(1)));

    let failed = &entries[6];
    assert_eq!(failed.event_group.as_ref().unwrap().action_ref, "notify");
    assert!(failed.failure.is_some());

    // Pure: same input, same output
    assert_eq!(correlate(&events), entries);
}

#[test]
fn test_correlate_keeps_undecodable_events() {
    let mut bad = scheduled(5, &slack_input());
    bad.activity_task_scheduled_event_attributes
        .as_mut()
        .unwrap()
        .input
        .payloads
        .clear();
    let events = vec![bad, HistoryEvent::activity_started(6, 5, 1)];

    let entries = correlate(&events);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.event_group.is_none()));
}

#[test]
fn test_history_json_round_trip() {
    let events = vec![scheduled(5, &slack_input()), HistoryEvent::activity_started(6, 5, 1)];
    let wire = serde_json::to_string(&json!({ "events": events })).unwrap();

    let history = History::from_json(&wire).unwrap();
    assert_eq!(history.events, events);
}
