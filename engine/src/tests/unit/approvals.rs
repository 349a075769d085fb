// Approval gate - pause, decide, isolation, and preview sanitization

use uuid::Uuid;

use cadence_shared::{ApprovalStatus, ExecutionStatus};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::EngineStore;
use crate::tests::fixtures;
use crate::tests::helpers::{FakeDirectory, TestContext};
use crate::workflows::actions::Action;
use crate::workflows::engine::Workflow;
use crate::workflows::triggers::TriggerType;

#[tokio::test]
async fn gated_action_pauses_the_execution() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let approver = Uuid::new_v4();
    let workflow = fixtures::gated_welcome_workflow(ctx.org_id, owner, approver);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_created_event(ctx.org_id, owner);
    let executions = ctx.engine.handle_event(&event).await;

    let execution = ctx.engine.get_execution(executions[0].id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Paused);
    assert_eq!(execution.paused_at_index, Some(1));
    // Action 1 ran, the gated action did not.
    assert_eq!(execution.actions_executed.len(), 1);
    assert_eq!(ctx.tasks.created.lock().unwrap().len(), 1);
    assert_eq!(ctx.mailer.sent_count(), 0);

    let pending = ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].owner_id, approver);
    assert_eq!(pending[0].execution_id, execution.id);
    assert!(pending[0].due_date > chrono::Utc::now());
}

#[tokio::test]
async fn approving_runs_the_deferred_action_and_finishes() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let approver = Uuid::new_v4();
    let workflow = fixtures::gated_welcome_workflow(ctx.org_id, owner, approver);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_created_event(ctx.org_id, owner);
    ctx.engine.handle_event(&event).await;
    let task = ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap()[0].clone();

    let execution = ctx.engine.approve(task.id, approver).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.actions_executed.len(), 2);

    // The stored payload kept the rendered config across the pause.
    assert_eq!(ctx.mailer.sent_count(), 1);
    let sent = ctx.mailer.sent.lock().unwrap();
    assert_eq!(sent[0].to, "dana.reyes@example.com");
    assert_eq!(sent[0].subject, "Welcome, Dana Reyes");

    let stored = ctx.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Completed);
    assert_eq!(stored.decided_by, Some(approver));
}

#[tokio::test]
async fn rejecting_cancels_the_rest_of_the_chain() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let approver = Uuid::new_v4();
    let workflow = fixtures::gated_welcome_workflow(ctx.org_id, owner, approver);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let event = fixtures::lead_created_event(ctx.org_id, owner);
    ctx.engine.handle_event(&event).await;
    let task = ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap()[0].clone();

    let execution = ctx.engine.reject(task.id, approver).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    // The gated email never went out.
    assert_eq!(ctx.mailer.sent_count(), 0);
    assert_eq!(execution.actions_executed.len(), 1);
}

#[tokio::test]
async fn second_decision_hits_a_conflict() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let approver = Uuid::new_v4();
    let workflow = fixtures::gated_welcome_workflow(ctx.org_id, owner, approver);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    ctx.engine
        .handle_event(&fixtures::lead_created_event(ctx.org_id, owner))
        .await;
    let task = ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap()[0].clone();

    ctx.engine.approve(task.id, approver).await.unwrap();
    let err = ctx.engine.reject(task.id, approver).await.unwrap_err();
    assert!(matches!(err, EngineError::ApprovalConflict(id) if id == task.id));
    // Only the first decision took effect.
    assert_eq!(ctx.mailer.sent_count(), 1);
}

#[tokio::test]
async fn preview_contains_no_raw_pii() {
    let ctx = TestContext::new();
    let owner = Uuid::new_v4();
    let approver = Uuid::new_v4();
    let workflow = Workflow::new(ctx.org_id, "Callback email", TriggerType::RecordCreated)
        .with_actions(vec![
            Action::send_email(
                "{{email}}",
                "Call {{full_name}} at {{phone}}",
                "Full PII body: {{email}} / {{phone}}",
            )
            .with_approver(approver),
        ]);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    ctx.engine
        .handle_event(&fixtures::lead_created_event(ctx.org_id, owner))
        .await;
    let pending = ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap();
    let preview = &pending[0].preview;

    assert!(!preview.contains("dana.reyes@example.com"), "{preview}");
    assert!(!preview.contains("303 555 0142"), "{preview}");
    assert!(!preview.contains("Full PII body"), "{preview}");
    assert!(preview.contains("d***@example.com"), "{preview}");
}

#[tokio::test]
async fn approver_resolves_through_role_lookup() {
    let manager = Uuid::new_v4();
    let directory = FakeDirectory::default().with_role("manager", manager);
    let ctx = TestContext::with_directory(EngineConfig::default(), directory);

    let workflow = Workflow::new(ctx.org_id, "Managed gate", TriggerType::RecordCreated)
        .with_actions(vec![
            Action::send_email("{{email}}", "hello", "body").with_approver_role("manager"),
        ]);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    ctx.engine
        .handle_event(&fixtures::lead_created_event(ctx.org_id, Uuid::new_v4()))
        .await;
    let pending = ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap();
    assert_eq!(pending[0].owner_id, manager);
}

#[tokio::test]
async fn unresolvable_approver_fails_the_action() {
    // No approver on the config and an empty directory.
    let ctx = TestContext::new();
    let mut action = Action::send_email("{{email}}", "hello", "body");
    action.requires_approval = true;
    let workflow = Workflow::new(ctx.org_id, "Orphan gate", TriggerType::RecordCreated)
        .with_actions(vec![action]);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let executions = ctx
        .engine
        .handle_event(&fixtures::lead_created_event(ctx.org_id, Uuid::new_v4()))
        .await;
    let execution = ctx.engine.get_execution(executions[0].id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error_message.as_deref().unwrap().contains("approver"));
    assert_eq!(ctx.mailer.sent_count(), 0);
    assert!(ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn gate_at_index_zero_pauses_before_any_side_effect() {
    let ctx = TestContext::new();
    let approver = Uuid::new_v4();
    let workflow = Workflow::new(ctx.org_id, "Gate first", TriggerType::RecordCreated)
        .with_actions(vec![
            Action::send_email("{{email}}", "hello", "body").with_approver(approver),
            Action::add_note("after approval"),
        ]);
    ctx.engine.save_workflow(&workflow).await.unwrap();

    let executions = ctx
        .engine
        .handle_event(&fixtures::lead_created_event(ctx.org_id, Uuid::new_v4()))
        .await;
    let execution = ctx.engine.get_execution(executions[0].id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Paused);
    assert_eq!(execution.paused_at_index, Some(0));
    assert!(execution.actions_executed.is_empty());
    assert!(ctx.records.notes.lock().unwrap().is_empty());

    let task = ctx.engine.list_pending_approvals(ctx.org_id).await.unwrap()[0].clone();
    let resumed = ctx.engine.approve(task.id, approver).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Success);
    assert_eq!(ctx.mailer.sent_count(), 1);
    assert_eq!(ctx.records.notes.lock().unwrap().len(), 1);
}
