// Dispatch, dedup, cascade depth, failure policies, and retry

use uuid::Uuid;

use cadence_shared::ExecutionStatus;

use crate::config::{EngineConfig, FailurePolicy};
use crate::error::EngineError;
use crate::tests::fixtures;
use crate::tests::helpers::TestContext;
use crate::workflows::actions::Action;
use crate::workflows::engine::Workflow;
use crate::workflows::triggers::TriggerType;

#[tokio::test]
async fn qualified_lead_triggers_notification() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let workflow = fixtures::qualified_lead_workflow(ctx.org_id, owner);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_qualified_event(ctx.org_id, 80, owner);
    let executions = ctx.engine.handle_event(&event).await;

    assert_eq!(executions.len(), 1);
    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert!(execution.matched_conditions);
    assert_eq!(execution.actions_executed.len(), 1);

    let notifications = ctx.notifier.notifications.lock().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, owner);
    assert_eq!(notifications[0].body, "Dana Reyes reached a score of 80.");
}

#[tokio::test]
async fn unmatched_conditions_record_a_skipped_execution() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let workflow = fixtures::qualified_lead_workflow(ctx.org_id, owner);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_qualified_event(ctx.org_id, 40, owner);
    let executions = ctx.engine.handle_event(&event).await;

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Skipped);
    assert!(!executions[0].matched_conditions);
    assert!(executions[0].actions_executed.is_empty());
    assert_eq!(ctx.notifier.notifications.lock().unwrap().len(), 0);

    // The skipped run still lands in history.
    let history = ctx.engine.execution_history(workflow.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn one_time_workflow_runs_once_per_entity() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let workflow = fixtures::qualified_lead_workflow(ctx.org_id, owner).one_time();
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_qualified_event(ctx.org_id, 90, owner);
    assert_eq!(ctx.engine.handle_event(&event).await.len(), 1);

    // Same entity fires again; the dedup check blocks it.
    let mut repeat = fixtures::lead_qualified_event(ctx.org_id, 90, owner);
    repeat.entity_id = event.entity_id;
    assert!(ctx.engine.handle_event(&repeat).await.is_empty());

    assert_eq!(ctx.notifier.notifications.lock().unwrap().len(), 1);
    let history = ctx.engine.execution_history(workflow.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn events_beyond_cascade_depth_are_dropped() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let workflow = fixtures::qualified_lead_workflow(ctx.org_id, owner);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event =
        fixtures::lead_qualified_event(ctx.org_id, 90, owner).spawned_by(Uuid::new_v4(), 3);
    assert_eq!(event.depth, 4);

    let executions = ctx.engine.handle_event(&event).await;
    assert!(executions.is_empty());
    // Dropped before the event log.
    assert_eq!(ctx.store.event_count().await, 0);
}

#[tokio::test]
async fn abort_policy_stops_the_chain() {
    let ctx = TestContext::new();
    ctx.mailer.set_failing(true);
    let workflow = Workflow::new(ctx.org_id, "Email then note", TriggerType::RecordCreated)
        .with_actions(vec![
            Action::send_email("a@example.com", "hi", "body"),
            Action::add_note("after the email"),
        ]);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_created_event(ctx.org_id, Uuid::new_v4());
    let executions = ctx.engine.handle_event(&event).await;

    let execution = ctx.engine.get_execution(executions[0].id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.actions_executed.len(), 1);
    assert!(execution.error_message.as_deref().unwrap().contains("smtp"));
    assert!(ctx.records.notes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn continue_policy_finishes_as_partial() {
    let ctx = TestContext::new();
    ctx.mailer.set_failing(true);
    let workflow = Workflow::new(ctx.org_id, "Email then note", TriggerType::RecordCreated)
        .on_failure(FailurePolicy::Continue)
        .with_actions(vec![
            Action::send_email("a@example.com", "hi", "body"),
            Action::add_note("after the email"),
        ]);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_created_event(ctx.org_id, Uuid::new_v4());
    let executions = ctx.engine.handle_event(&event).await;

    let execution = ctx.engine.get_execution(executions[0].id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Partial);
    assert_eq!(execution.actions_executed.len(), 2);
    assert!(!execution.actions_executed[0].success);
    assert!(execution.actions_executed[1].success);
    assert_eq!(ctx.records.notes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn retry_creates_a_distinct_execution_from_action_zero() {
    let ctx = TestContext::new();
    ctx.mailer.set_failing(true);
    let workflow = Workflow::new(ctx.org_id, "Welcome email", TriggerType::RecordCreated)
        .one_time()
        .with_actions(vec![Action::send_email("a@example.com", "hi", "body")]);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_created_event(ctx.org_id, Uuid::new_v4());
    let executions = ctx.engine.handle_event(&event).await;
    let failed = ctx.engine.get_execution(executions[0].id).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);

    ctx.mailer.set_failing(false);
    let retried = ctx.engine.retry_execution(failed.id).await.unwrap();
    let retried = ctx.engine.get_execution(retried.id).await.unwrap();

    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.retried_from, Some(failed.id));
    assert_eq!(retried.status, ExecutionStatus::Success);
    assert_eq!(ctx.mailer.sent_count(), 1);

    // The original stays in history untouched.
    let history = ctx.engine.execution_history(workflow.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|e| e.id == failed.id
        && e.status == ExecutionStatus::Failed));
}

#[tokio::test]
async fn retry_rejects_non_terminal_executions() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let workflow = fixtures::qualified_lead_workflow(ctx.org_id, owner);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_qualified_event(ctx.org_id, 90, owner);
    let executions = ctx.engine.handle_event(&event).await;

    let err = ctx.engine.retry_execution(executions[0].id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotRetryable(_)));
}

#[tokio::test]
async fn manual_trigger_propagates_dispatch_rejections() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let workflow = fixtures::qualified_lead_workflow(ctx.org_id, owner).one_time();
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_qualified_event(ctx.org_id, 90, owner);
    let execution = ctx.engine.trigger_manual(workflow.id, &event).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);

    // Unlike handle_event, the dedup rejection is an error here.
    let mut repeat = fixtures::lead_qualified_event(ctx.org_id, 90, owner);
    repeat.entity_id = event.entity_id;
    let err = ctx.engine.trigger_manual(workflow.id, &repeat).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateExecution { .. }));

    let deep = fixtures::lead_qualified_event(ctx.org_id, 90, owner).spawned_by(Uuid::new_v4(), 5);
    let err = ctx.engine.trigger_manual(workflow.id, &deep).await.unwrap_err();
    assert!(matches!(err, EngineError::CascadeDepthExceeded { .. }));
}

#[tokio::test]
async fn save_rejects_unknown_condition_fields() {
    let ctx = TestContext::new();
    let mut workflow = fixtures::qualified_lead_workflow(ctx.org_id, Uuid::new_v4());
    workflow.conditions[0].field = "no_such_field".to_string();

    let err = ctx.engine.save_workflow(&workflow).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.to_string().contains("no_such_field"));
}

#[tokio::test]
async fn save_rejects_malformed_action_configs() {
    let ctx = TestContext::new();
    let workflow = Workflow::new(ctx.org_id, "Broken", TriggerType::RecordCreated)
        .with_actions(vec![Action::send_email("", "subject", "body")]);

    let err = ctx.engine.save_workflow(&workflow).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn personal_workflows_only_match_their_owner() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let workflow = fixtures::qualified_lead_workflow(ctx.org_id, owner).personal(owner);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let other_user = fixtures::lead_qualified_event(ctx.org_id, 90, Uuid::new_v4());
    assert!(ctx.engine.handle_event(&other_user).await.is_empty());

    let own = fixtures::lead_qualified_event(ctx.org_id, 90, owner);
    assert_eq!(ctx.engine.handle_event(&own).await.len(), 1);
}

#[tokio::test]
async fn dispatch_never_panics_on_config_defaults() {
    // A config straight from a clean environment drives a full run.
    let config = EngineConfig::from_env().unwrap();
    assert_eq!(config.max_cascade_depth, EngineConfig::default().max_cascade_depth);
    let ctx = TestContext::with_config(config);
    let event = fixtures::lead_created_event(ctx.org_id, Uuid::new_v4());
    assert!(ctx.engine.handle_event(&event).await.is_empty());
}
