// Workflow Engine - trigger dispatch, condition gating, the action loop

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cadence_shared::{ApprovalStatus, ApprovalTaskView, ExecutionStatus, ExecutionSummary};

use crate::config::{EngineConfig, FailurePolicy};
use crate::error::{EngineError, EngineResult};
use crate::hours::BusinessCalendar;
use crate::services::Collaborators;
use crate::store::EngineStore;
use crate::workflows::actions::{Action, ActionOutcome};
use crate::workflows::approvals::{ApprovalGate, ApprovalTask};
use crate::workflows::conditions::{self, Condition, ConditionLogic};
use crate::workflows::executor::{ExecutionContext, ExecutorRegistry, render_templates};
use crate::workflows::triggers::{DomainEvent, EntityKind, EventSource, TriggerType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceMode {
    /// At most one blocking execution per (workflow, entity).
    OneTime,
    /// Every matching event runs.
    Recurring,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorkflowScope {
    /// Applies to every matching event in the organization.
    Org,
    /// Applies only to events raised by the owning user.
    Personal { owner_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    /// Extra key/value constraints on the event snapshot. The
    /// `entity_kind` key matches the event's entity type.
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    pub actions: Vec<Action>,
    pub recurrence: RecurrenceMode,
    pub is_enabled: bool,
    pub scope: WorkflowScope,
    /// Overrides the engine-wide failure policy when set.
    pub on_failure: Option<FailurePolicy>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(org_id: Uuid, name: &str, trigger_type: TriggerType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.to_string(),
            description: None,
            trigger_type,
            trigger_config: serde_json::json!({}),
            conditions: Vec::new(),
            condition_logic: ConditionLogic::And,
            actions: Vec::new(),
            recurrence: RecurrenceMode::Recurring,
            is_enabled: true,
            scope: WorkflowScope::Org,
            on_failure: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_entity(mut self, kind: EntityKind) -> Self {
        if let Some(map) = self.trigger_config.as_object_mut() {
            map.insert(
                "entity_kind".to_string(),
                Value::String(kind.as_str().to_string()),
            );
        }
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>, logic: ConditionLogic) -> Self {
        self.conditions = conditions;
        self.condition_logic = logic;
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn one_time(mut self) -> Self {
        self.recurrence = RecurrenceMode::OneTime;
        self
    }

    pub fn personal(mut self, owner_id: Uuid) -> Self {
        self.scope = WorkflowScope::Personal { owner_id };
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = Some(policy);
        self
    }

    /// The entity kind pinned by the trigger config, if any.
    pub fn entity_kind(&self) -> Option<EntityKind> {
        self.trigger_config
            .get("entity_kind")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
    }

    /// Every trigger-config key must match the event. `entity_kind`
    /// compares against the event's entity type, everything else
    /// against the snapshot.
    pub fn matches_trigger_config(&self, event: &DomainEvent) -> bool {
        let Some(constraints) = self.trigger_config.as_object() else {
            return true;
        };
        constraints.iter().all(|(key, expected)| {
            if key == "entity_kind" {
                expected.as_str() == Some(event.entity_kind.as_str())
            } else {
                event.snapshot.get(key) == Some(expected)
            }
        })
    }

    pub fn matches_scope(&self, event: &DomainEvent) -> bool {
        match &self.scope {
            WorkflowScope::Org => true,
            WorkflowScope::Personal { owner_id } => event.user_id == Some(*owner_id),
        }
    }
}

/// One run of one workflow against one event. Write-once apart from
/// status transitions and the action log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub depth: i32,
    pub status: ExecutionStatus,
    pub matched_conditions: bool,
    pub actions_total: i32,
    pub actions_executed: Vec<ActionOutcome>,
    pub paused_at_index: Option<i32>,
    pub error_message: Option<String>,
    /// Set when this execution is a retry of a terminal one.
    pub retried_from: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// The entity snapshot at trigger time, never re-fetched.
    pub snapshot: Value,
    pub user_id: Option<Uuid>,
}

impl WorkflowExecution {
    fn new(workflow: &Workflow, event: &DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            event_id: event.event_id,
            org_id: event.org_id,
            entity_kind: event.entity_kind,
            entity_id: event.entity_id,
            depth: event.depth,
            status: ExecutionStatus::Running,
            matched_conditions: false,
            actions_total: workflow.actions.len() as i32,
            actions_executed: Vec::new(),
            paused_at_index: None,
            error_message: None,
            retried_from: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            snapshot: event.snapshot.clone(),
            user_id: event.user_id,
        }
    }

    fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.paused_at_index = None;
        let completed = Utc::now();
        self.duration_ms = Some((completed - self.started_at).num_milliseconds());
        self.completed_at = Some(completed);
    }

    pub fn context(&self) -> ExecutionContext {
        ExecutionContext {
            execution_id: self.id,
            workflow_id: self.workflow_id,
            org_id: self.org_id,
            entity_kind: self.entity_kind,
            entity_id: self.entity_id,
            user_id: self.user_id,
            snapshot: self.snapshot.clone(),
            depth: self.depth,
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id,
            workflow_id: self.workflow_id,
            entity_kind: self.entity_kind.as_str().to_string(),
            entity_id: self.entity_id,
            status: self.status,
            matched_conditions: self.matched_conditions,
            actions_total: self.actions_total,
            actions_executed: self.actions_executed.len() as i32,
            error_message: self.error_message.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
        }
    }

    fn outcome_at(&self, index: i32) -> Option<&ActionOutcome> {
        self.actions_executed.iter().find(|o| o.index == index)
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn EngineStore>,
    registry: ExecutorRegistry,
    gate: ApprovalGate,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn EngineStore>, services: Collaborators, config: EngineConfig) -> Self {
        let registry = ExecutorRegistry::standard(&services);
        let calendar = BusinessCalendar::from_config(&config.business_hours);
        let gate = ApprovalGate::new(
            store.clone(),
            services.approvers.clone(),
            services.notifier.clone(),
            calendar,
            config.approval_timeout_hours,
            config.default_timezone,
        );
        Self {
            store,
            registry,
            gate,
            config,
        }
    }

    // --- workflow management ---

    pub async fn save_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        self.validate_workflow(workflow)?;
        self.store.insert_workflow(workflow).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "workflow saved");
        Ok(())
    }

    pub async fn update_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        self.validate_workflow(workflow)?;
        if self.store.get_workflow(workflow.id).await?.is_none() {
            return Err(EngineError::WorkflowNotFound(workflow.id));
        }
        self.store.update_workflow(workflow).await
    }

    /// Reject malformed workflows before they are stored. Condition
    /// field paths are checked against the entity type's schema here,
    /// never during evaluation.
    fn validate_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        if workflow.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "workflow name must not be empty".to_string(),
            ));
        }
        if workflow.actions.is_empty() {
            return Err(EngineError::Validation(
                "workflow must define at least one action".to_string(),
            ));
        }
        conditions::validate_conditions(workflow.entity_kind(), &workflow.conditions)?;
        for action in &workflow.actions {
            self.registry.validate(action.action_type, &action.config)?;
        }
        Ok(())
    }

    // --- trigger dispatch ---

    /// Dispatch one domain event against every enabled workflow for
    /// its trigger type. Never returns an error: internal failures are
    /// logged and surface as `failed` executions so the caller's own
    /// transaction is never blocked by automation.
    pub async fn handle_event(&self, event: &DomainEvent) -> Vec<WorkflowExecution> {
        if event.depth > self.config.max_cascade_depth {
            warn!(
                event_id = %event.event_id,
                depth = event.depth,
                max = self.config.max_cascade_depth,
                "cascade depth exceeded, event dropped"
            );
            return Vec::new();
        }
        if let Err(e) = self.store.insert_event(event).await {
            error!(event_id = %event.event_id, error = %e, "failed to record event");
            return Vec::new();
        }

        let workflows = match self
            .store
            .enabled_workflows(event.org_id, event.trigger_type)
            .await
        {
            Ok(workflows) => workflows,
            Err(e) => {
                error!(event_id = %event.event_id, error = %e, "workflow lookup failed");
                return Vec::new();
            }
        };

        let mut executions = Vec::new();
        for workflow in workflows {
            if !workflow.matches_scope(event) || !workflow.matches_trigger_config(event) {
                continue;
            }
            if workflow.recurrence == RecurrenceMode::OneTime {
                match self
                    .store
                    .has_blocking_execution(workflow.id, event.entity_id)
                    .await
                {
                    Ok(true) => {
                        debug!(
                            workflow_id = %workflow.id,
                            entity_id = %event.entity_id,
                            "one-time workflow already ran for entity, skipping"
                        );
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!(workflow_id = %workflow.id, error = %e, "dedup check failed");
                        continue;
                    }
                }
            }
            match self.run_workflow(&workflow, event, None).await {
                Ok(execution) => executions.push(execution),
                Err(e) => {
                    error!(workflow_id = %workflow.id, error = %e, "workflow run failed");
                }
            }
        }
        executions
    }

    async fn run_workflow(
        &self,
        workflow: &Workflow,
        event: &DomainEvent,
        retried_from: Option<Uuid>,
    ) -> EngineResult<WorkflowExecution> {
        let mut execution = WorkflowExecution::new(workflow, event);
        execution.retried_from = retried_from;
        execution.matched_conditions = conditions::evaluate(
            &workflow.conditions,
            workflow.condition_logic,
            &event.snapshot,
        );

        // Skipped runs are still logged for observability.
        if !execution.matched_conditions {
            execution.finish(ExecutionStatus::Skipped);
            self.store.insert_execution(&execution).await?;
            debug!(workflow_id = %workflow.id, execution_id = %execution.id, "conditions not met");
            return Ok(execution);
        }

        self.store.insert_execution(&execution).await?;
        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            actions = execution.actions_total,
            "execution started"
        );

        if let Err(e) = self.run_actions(workflow, &mut execution, 0).await {
            error!(execution_id = %execution.id, error = %e, "action loop aborted");
            execution.error_message = Some(e.to_string());
            execution.finish(ExecutionStatus::Failed);
            if let Err(e) = self.store.update_execution(&execution).await {
                error!(execution_id = %execution.id, error = %e, "failed to persist failure");
            }
        }
        Ok(execution)
    }

    /// Run actions from `start_index` in array order. Pauses at the
    /// first approval gate; otherwise drives the execution to a
    /// terminal status and persists it.
    async fn run_actions(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        start_index: usize,
    ) -> EngineResult<()> {
        let policy = workflow
            .on_failure
            .unwrap_or(self.config.default_failure_policy);

        for (index, action) in workflow.actions.iter().enumerate().skip(start_index) {
            let idx = index as i32;
            let mut rendered = action.clone();
            rendered.config = render_templates(&action.config, &execution.snapshot);

            if rendered.requires_approval {
                match self
                    .gate
                    .open(rendered, idx, execution.context(), execution.user_id)
                    .await
                {
                    Ok(task) => {
                        execution.status = ExecutionStatus::Paused;
                        execution.paused_at_index = Some(idx);
                        self.store.update_execution(execution).await?;
                        info!(
                            execution_id = %execution.id,
                            task_id = %task.id,
                            action_index = idx,
                            "execution paused for approval"
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(execution_id = %execution.id, error = %e, "approval gate failed");
                        let outcome =
                            ActionOutcome::failure(idx, action.action_type, e.to_string(), 0);
                        execution.error_message = outcome.error.clone();
                        execution.actions_executed.push(outcome);
                        if policy == FailurePolicy::Abort {
                            execution.finish(ExecutionStatus::Failed);
                            self.store.update_execution(execution).await?;
                            return Ok(());
                        }
                        continue;
                    }
                }
            }

            let outcome = self.execute_one(&rendered, idx, execution).await;
            let succeeded = outcome.success;
            if !succeeded {
                execution.error_message = Some(
                    EngineError::ActionFailed {
                        action_type: action.action_type,
                        index: idx,
                        message: outcome.error.clone().unwrap_or_default(),
                    }
                    .to_string(),
                );
            }
            execution.actions_executed.push(outcome);

            if !succeeded && policy == FailurePolicy::Abort {
                execution.finish(ExecutionStatus::Failed);
                self.store.update_execution(execution).await?;
                return Ok(());
            }
        }

        let any_failed = execution.actions_executed.iter().any(|o| !o.success);
        execution.finish(if any_failed {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Success
        });
        self.store.update_execution(execution).await?;
        info!(
            execution_id = %execution.id,
            status = execution.status.as_str(),
            "execution finished"
        );
        Ok(())
    }

    async fn execute_one(
        &self,
        action: &Action,
        index: i32,
        execution: &WorkflowExecution,
    ) -> ActionOutcome {
        let started = Instant::now();
        let result = match self.registry.get(action.action_type) {
            Ok(executor) => executor.execute(&action.config, &execution.context()).await,
            Err(e) => Err(e.to_string().into()),
        };
        let elapsed = started.elapsed().as_millis() as i64;
        match result {
            Ok(output) => ActionOutcome::success(index, action.action_type, output, elapsed),
            Err(e) => {
                warn!(
                    execution_id = %execution.id,
                    action = %action.action_type,
                    index,
                    error = %e,
                    "action failed"
                );
                ActionOutcome::failure(index, action.action_type, e.to_string(), elapsed)
            }
        }
    }

    // --- approval decision points ---

    /// Approve a pending task: run the deferred action from the stored
    /// payload, then resume the action loop at the next index.
    pub async fn approve(&self, task_id: Uuid, decided_by: Uuid) -> EngineResult<WorkflowExecution> {
        let task = self.gate.approve(task_id, decided_by).await?;
        info!(task_id = %task.id, %decided_by, "approval granted");
        self.continue_from_gate(task).await
    }

    /// Reject a pending task: the execution is canceled and no action
    /// at or after the gate's index ever runs.
    pub async fn reject(&self, task_id: Uuid, decided_by: Uuid) -> EngineResult<WorkflowExecution> {
        let task = self.gate.reject(task_id, decided_by).await?;
        let mut execution = self.load_execution(task.execution_id).await?;
        execution.finish(ExecutionStatus::Canceled);
        self.store.update_execution(&execution).await?;
        info!(task_id = %task.id, execution_id = %execution.id, "approval rejected, execution canceled");
        Ok(execution)
    }

    /// Expire a claimed task whose due date has passed. The deferred
    /// action is never executed; the requester is notified.
    pub async fn expire_task(&self, task: &ApprovalTask) -> EngineResult<WorkflowExecution> {
        self.store
            .decide_task(task.id, ApprovalStatus::Expired, None)
            .await?;
        let mut execution = self.load_execution(task.execution_id).await?;
        execution.finish(ExecutionStatus::Expired);
        self.store.update_execution(&execution).await?;
        if let Some(requester) = task.requested_by {
            self.gate.notify_expiry(requester, task).await;
        }
        info!(task_id = %task.id, execution_id = %execution.id, "approval expired");
        Ok(execution)
    }

    /// Drive a paused execution forward from its resolved task. Used
    /// by the resume sweep when the decision-time continuation did not
    /// complete (process restart, delivery delay).
    pub async fn resume_execution(&self, task: ApprovalTask) -> EngineResult<WorkflowExecution> {
        match task.status {
            ApprovalStatus::Completed => self.continue_from_gate(task).await,
            ApprovalStatus::Canceled => {
                let mut execution = self.claim_for_resume(&task).await?;
                execution.finish(ExecutionStatus::Canceled);
                self.store.update_execution(&execution).await?;
                Ok(execution)
            }
            ApprovalStatus::Expired => {
                let mut execution = self.claim_for_resume(&task).await?;
                execution.finish(ExecutionStatus::Expired);
                self.store.update_execution(&execution).await?;
                Ok(execution)
            }
            ApprovalStatus::Pending => Err(EngineError::ApprovalConflict(task.id)),
        }
    }

    /// Take exclusive ownership of a paused execution. The CAS loses
    /// to whichever worker (or in-request decision continuation) got
    /// there first.
    async fn claim_for_resume(&self, task: &ApprovalTask) -> EngineResult<WorkflowExecution> {
        let mut execution = self.load_execution(task.execution_id).await?;
        if !self.store.claim_paused_execution(execution.id).await? {
            return Err(EngineError::ApprovalConflict(task.id));
        }
        execution.status = ExecutionStatus::Running;
        Ok(execution)
    }

    async fn continue_from_gate(&self, task: ApprovalTask) -> EngineResult<WorkflowExecution> {
        let mut execution = self.claim_for_resume(&task).await?;
        let workflow = self
            .store
            .get_workflow(execution.workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(execution.workflow_id))?;
        let policy = workflow
            .on_failure
            .unwrap_or(self.config.default_failure_policy);

        // Skip re-execution if an outcome was already recorded at the
        // gate, so a resume after a crash cannot double-send.
        let prior = execution.outcome_at(task.action_index).map(|o| o.success);
        let deferred_ok = match prior {
            Some(success) => success,
            None => {
                let outcome = self
                    .execute_one(&task.payload.action, task.action_index, &execution)
                    .await;
                let ok = outcome.success;
                if !ok {
                    execution.error_message = outcome.error.clone();
                }
                execution.actions_executed.push(outcome);
                self.store.update_execution(&execution).await?;
                ok
            }
        };

        if !deferred_ok && policy == FailurePolicy::Abort {
            execution.finish(ExecutionStatus::Failed);
            self.store.update_execution(&execution).await?;
            return Ok(execution);
        }

        self.run_actions(&workflow, &mut execution, (task.action_index + 1) as usize)
            .await?;
        Ok(execution)
    }

    /// Run one workflow directly against an event, for the manual
    /// trigger surface. Unlike `handle_event` this propagates dispatch
    /// rejections to the caller.
    pub async fn trigger_manual(
        &self,
        workflow_id: Uuid,
        event: &DomainEvent,
    ) -> EngineResult<WorkflowExecution> {
        if event.depth > self.config.max_cascade_depth {
            return Err(EngineError::CascadeDepthExceeded {
                depth: event.depth,
                max: self.config.max_cascade_depth,
            });
        }
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        if workflow.recurrence == RecurrenceMode::OneTime
            && self
                .store
                .has_blocking_execution(workflow.id, event.entity_id)
                .await?
        {
            return Err(EngineError::DuplicateExecution {
                workflow_id: workflow.id,
                entity_id: event.entity_id,
            });
        }
        self.store.insert_event(event).await?;
        self.run_workflow(&workflow, event, None).await
    }

    // --- retry ---

    /// Re-run a terminal `failed` or `expired` execution from action 0
    /// under a brand-new event and execution id. The original stays
    /// untouched for audit; the one-time dedup check is bypassed.
    pub async fn retry_execution(&self, execution_id: Uuid) -> EngineResult<WorkflowExecution> {
        let original = self.load_execution(execution_id).await?;
        if !matches!(
            original.status,
            ExecutionStatus::Failed | ExecutionStatus::Expired
        ) {
            return Err(EngineError::NotRetryable(original.status));
        }
        let workflow = self
            .store
            .get_workflow(original.workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(original.workflow_id))?;

        let mut event = DomainEvent::new(
            workflow.trigger_type,
            original.entity_kind,
            original.entity_id,
            original.org_id,
            original.snapshot.clone(),
            EventSource::System,
        );
        event.depth = original.depth;
        self.store.insert_event(&event).await?;

        info!(original = %original.id, event_id = %event.event_id, "retrying execution");
        self.run_workflow(&workflow, &event, Some(original.id)).await
    }

    // --- read surfaces ---

    /// Pending approvals for an organization, as sanitized views. The
    /// stored payloads never cross this boundary.
    pub async fn list_pending_approvals(&self, org_id: Uuid) -> EngineResult<Vec<ApprovalTaskView>> {
        let tasks = self.store.pending_tasks(org_id).await?;
        Ok(tasks.iter().map(ApprovalTask::view).collect())
    }

    pub async fn execution_history(&self, workflow_id: Uuid) -> EngineResult<Vec<ExecutionSummary>> {
        let executions = self.store.executions_for_workflow(workflow_id).await?;
        Ok(executions.iter().map(WorkflowExecution::summary).collect())
    }

    pub async fn get_execution(&self, id: Uuid) -> EngineResult<WorkflowExecution> {
        self.load_execution(id).await
    }

    async fn load_execution(&self, id: Uuid) -> EngineResult<WorkflowExecution> {
        self.store
            .get_execution(id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(id))
    }
}
