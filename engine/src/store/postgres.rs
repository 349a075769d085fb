// Postgres store - the durable backend for multi-worker deployments
//
// Claim and decide are compare-and-set UPDATEs on the status and
// claimant columns; the WHERE clause is re-checked after any
// concurrent writer commits, so each row goes to exactly one worker.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use cadence_shared::ApprovalStatus;

use crate::error::{EngineError, EngineResult};
use crate::store::{CLAIM_LEASE_MINUTES, EngineStore};
use crate::workflows::approvals::ApprovalTask;
use crate::workflows::engine::{Workflow, WorkflowExecution};
use crate::workflows::triggers::{DomainEvent, TriggerType};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Enums are stored as their serde string form in text columns.
fn enum_str<T: Serialize>(value: &T) -> EngineResult<String> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn parse_enum<T: DeserializeOwned>(text: &str) -> EngineResult<T> {
    Ok(serde_json::from_value(Value::String(text.to_string()))?)
}

fn workflow_from_row(row: &PgRow) -> EngineResult<Workflow> {
    let on_failure: Option<String> = row.try_get("on_failure")?;
    Ok(Workflow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        trigger_type: parse_enum(row.try_get::<String, _>("trigger_type")?.as_str())?,
        trigger_config: row.try_get("trigger_config")?,
        conditions: serde_json::from_value(row.try_get("conditions")?)?,
        condition_logic: parse_enum(row.try_get::<String, _>("condition_logic")?.as_str())?,
        actions: serde_json::from_value(row.try_get("actions")?)?,
        recurrence: parse_enum(row.try_get::<String, _>("recurrence")?.as_str())?,
        is_enabled: row.try_get("is_enabled")?,
        scope: serde_json::from_value(row.try_get("scope")?)?,
        on_failure: on_failure.as_deref().map(parse_enum).transpose()?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn execution_from_row(row: &PgRow) -> EngineResult<WorkflowExecution> {
    Ok(WorkflowExecution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        event_id: row.try_get("event_id")?,
        org_id: row.try_get("org_id")?,
        entity_kind: parse_enum(row.try_get::<String, _>("entity_kind")?.as_str())?,
        entity_id: row.try_get("entity_id")?,
        depth: row.try_get("depth")?,
        status: parse_enum(row.try_get::<String, _>("status")?.as_str())?,
        matched_conditions: row.try_get("matched_conditions")?,
        actions_total: row.try_get("actions_total")?,
        actions_executed: serde_json::from_value(row.try_get("actions_executed")?)?,
        paused_at_index: row.try_get("paused_at_index")?,
        error_message: row.try_get("error_message")?,
        retried_from: row.try_get("retried_from")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
        snapshot: row.try_get("snapshot")?,
        user_id: row.try_get("user_id")?,
    })
}

fn task_from_row(row: &PgRow) -> EngineResult<ApprovalTask> {
    Ok(ApprovalTask {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        action_index: row.try_get("action_index")?,
        org_id: row.try_get("org_id")?,
        owner_id: row.try_get("owner_id")?,
        requested_by: row.try_get("requested_by")?,
        due_date: row.try_get("due_date")?,
        status: parse_enum(row.try_get::<String, _>("status")?.as_str())?,
        preview: row.try_get("preview")?,
        payload: serde_json::from_value(row.try_get("payload")?)?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
        decided_by: row.try_get("decided_by")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
    })
}

#[async_trait]
impl EngineStore for PgStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, org_id, name, description, trigger_type, trigger_config,
                 conditions, condition_logic, actions, recurrence, is_enabled,
                 scope, on_failure, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.org_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(enum_str(&workflow.trigger_type)?)
        .bind(&workflow.trigger_config)
        .bind(serde_json::to_value(&workflow.conditions)?)
        .bind(enum_str(&workflow.condition_logic)?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .bind(enum_str(&workflow.recurrence)?)
        .bind(workflow.is_enabled)
        .bind(serde_json::to_value(&workflow.scope)?)
        .bind(workflow.on_failure.as_ref().map(enum_str).transpose()?)
        .bind(workflow.created_by)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                name = $2, description = $3, trigger_type = $4,
                trigger_config = $5, conditions = $6, condition_logic = $7,
                actions = $8, recurrence = $9, is_enabled = $10, scope = $11,
                on_failure = $12, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(enum_str(&workflow.trigger_type)?)
        .bind(&workflow.trigger_config)
        .bind(serde_json::to_value(&workflow.conditions)?)
        .bind(enum_str(&workflow.condition_logic)?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .bind(enum_str(&workflow.recurrence)?)
        .bind(workflow.is_enabled)
        .bind(serde_json::to_value(&workflow.scope)?)
        .bind(workflow.on_failure.as_ref().map(enum_str).transpose()?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::WorkflowNotFound(workflow.id));
        }
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn enabled_workflows(
        &self,
        org_id: Uuid,
        trigger: TriggerType,
    ) -> EngineResult<Vec<Workflow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflows
            WHERE org_id = $1 AND trigger_type = $2 AND is_enabled
            ORDER BY created_at
            "#,
        )
        .bind(org_id)
        .bind(trigger.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(workflow_from_row).collect()
    }

    async fn insert_event(&self, event: &DomainEvent) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_events
                (event_id, trigger_type, entity_kind, entity_id, org_id,
                 user_id, source, depth, snapshot, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.event_id)
        .bind(event.trigger_type.as_str())
        .bind(event.entity_kind.as_str())
        .bind(event.entity_id)
        .bind(event.org_id)
        .bind(event.user_id)
        .bind(serde_json::to_value(&event.source)?)
        .bind(event.depth)
        .bind(&event.snapshot)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, event_id, org_id, entity_kind, entity_id,
                 depth, status, matched_conditions, actions_total,
                 actions_executed, paused_at_index, error_message,
                 retried_from, started_at, completed_at, duration_ms,
                 snapshot, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.event_id)
        .bind(execution.org_id)
        .bind(execution.entity_kind.as_str())
        .bind(execution.entity_id)
        .bind(execution.depth)
        .bind(execution.status.as_str())
        .bind(execution.matched_conditions)
        .bind(execution.actions_total)
        .bind(serde_json::to_value(&execution.actions_executed)?)
        .bind(execution.paused_at_index)
        .bind(&execution.error_message)
        .bind(execution.retried_from)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.snapshot)
        .bind(execution.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = $2, actions_executed = $3, paused_at_index = $4,
                error_message = $5, completed_at = $6, duration_ms = $7
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(serde_json::to_value(&execution.actions_executed)?)
        .bind(execution.paused_at_index)
        .bind(&execution.error_message)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::ExecutionNotFound(execution.id));
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(execution_from_row).transpose()
    }

    async fn executions_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> EngineResult<Vec<WorkflowExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = $1 ORDER BY started_at",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn has_blocking_execution(
        &self,
        workflow_id: Uuid,
        entity_id: Uuid,
    ) -> EngineResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM workflow_executions
                WHERE workflow_id = $1 AND entity_id = $2
                  AND status NOT IN ('failed', 'skipped')
            ) AS blocked
            "#,
        )
        .bind(workflow_id)
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("blocked")?)
    }

    async fn insert_task(&self, task: &ApprovalTask) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_tasks
                (id, execution_id, action_index, org_id, owner_id,
                 requested_by, due_date, status, preview, payload,
                 created_at, resolved_at, decided_by, claimed_by, claimed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(task.id)
        .bind(task.execution_id)
        .bind(task.action_index)
        .bind(task.org_id)
        .bind(task.owner_id)
        .bind(task.requested_by)
        .bind(task.due_date)
        .bind(task.status.as_str())
        .bind(&task.preview)
        .bind(serde_json::to_value(&task.payload)?)
        .bind(task.created_at)
        .bind(task.resolved_at)
        .bind(task.decided_by)
        .bind(&task.claimed_by)
        .bind(task.claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> EngineResult<Option<ApprovalTask>> {
        let row = sqlx::query("SELECT * FROM approval_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn find_pending_task(
        &self,
        execution_id: Uuid,
        action_index: i32,
    ) -> EngineResult<Option<ApprovalTask>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM approval_tasks
            WHERE execution_id = $1 AND action_index = $2 AND status = 'pending'
            "#,
        )
        .bind(execution_id)
        .bind(action_index)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn pending_tasks(&self, org_id: Uuid) -> EngineResult<Vec<ApprovalTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM approval_tasks
            WHERE org_id = $1 AND status = 'pending'
            ORDER BY due_date
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn decide_task(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decided_by: Option<Uuid>,
    ) -> EngineResult<ApprovalTask> {
        let row = sqlx::query(
            r#"
            UPDATE approval_tasks
            SET status = $2, decided_by = $3, resolved_at = now()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(decided_by)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => task_from_row(&row),
            None => match self.get_task(id).await? {
                Some(_) => Err(EngineError::ApprovalConflict(id)),
                None => Err(EngineError::TaskNotFound(id)),
            },
        }
    }

    async fn claim_due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        claimant: &str,
    ) -> EngineResult<Vec<ApprovalTask>> {
        let stale = now - Duration::minutes(CLAIM_LEASE_MINUTES);
        let rows = sqlx::query(
            r#"
            UPDATE approval_tasks SET claimed_by = $3, claimed_at = $1
            WHERE status = 'pending'
              AND (claimed_by IS NULL OR claimed_at < $4)
              AND id IN (
                SELECT id FROM approval_tasks
                WHERE status = 'pending' AND due_date < $1
                  AND (claimed_by IS NULL OR claimed_at < $4)
                ORDER BY due_date
                LIMIT $2
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(claimant)
        .bind(stale)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn claim_paused_execution(&self, id: Uuid) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions SET status = 'running'
            WHERE id = $1 AND status = 'paused'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn resumable_executions(
        &self,
        limit: i64,
    ) -> EngineResult<Vec<(WorkflowExecution, ApprovalTask)>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_executions
            WHERE status = 'paused' AND paused_at_index IS NOT NULL
            ORDER BY started_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut pairs = Vec::new();
        for row in &rows {
            let execution = execution_from_row(row)?;
            let index = match execution.paused_at_index {
                Some(index) => index,
                None => continue,
            };
            let task = sqlx::query(
                r#"
                SELECT * FROM approval_tasks
                WHERE execution_id = $1 AND action_index = $2 AND status <> 'pending'
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(execution.id)
            .bind(index)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(task) = task {
                pairs.push((execution, task_from_row(&task)?));
            }
        }
        Ok(pairs)
    }
}
