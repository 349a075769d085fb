// In-memory store - single-process deployments and tests
//
// One write lock guards all maps, so the compare-and-set operations
// (`decide_task`, `claim_due_tasks`) are atomic by construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use cadence_shared::{ApprovalStatus, ExecutionStatus};

use crate::error::{EngineError, EngineResult};
use crate::store::{CLAIM_LEASE_MINUTES, EngineStore};
use crate::workflows::approvals::ApprovalTask;
use crate::workflows::engine::{Workflow, WorkflowExecution};
use crate::workflows::triggers::{DomainEvent, TriggerType};

#[derive(Default)]
struct Inner {
    workflows: BTreeMap<Uuid, Workflow>,
    events: BTreeMap<Uuid, DomainEvent>,
    executions: BTreeMap<Uuid, WorkflowExecution>,
    tasks: BTreeMap<Uuid, ApprovalTask>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events, for test assertions.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        self.inner
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.workflows.contains_key(&workflow.id) {
            return Err(EngineError::WorkflowNotFound(workflow.id));
        }
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<Workflow>> {
        Ok(self.inner.read().await.workflows.get(&id).cloned())
    }

    async fn enabled_workflows(
        &self,
        org_id: Uuid,
        trigger: TriggerType,
    ) -> EngineResult<Vec<Workflow>> {
        Ok(self
            .inner
            .read()
            .await
            .workflows
            .values()
            .filter(|w| w.org_id == org_id && w.trigger_type == trigger && w.is_enabled)
            .cloned()
            .collect())
    }

    async fn insert_event(&self, event: &DomainEvent) -> EngineResult<()> {
        self.inner
            .write()
            .await
            .events
            .insert(event.event_id, event.clone());
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> EngineResult<()> {
        self.inner
            .write()
            .await
            .executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.executions.contains_key(&execution.id) {
            return Err(EngineError::ExecutionNotFound(execution.id));
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<WorkflowExecution>> {
        Ok(self.inner.read().await.executions.get(&id).cloned())
    }

    async fn executions_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> EngineResult<Vec<WorkflowExecution>> {
        let mut executions: Vec<WorkflowExecution> = self
            .inner
            .read()
            .await
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.started_at);
        Ok(executions)
    }

    async fn has_blocking_execution(
        &self,
        workflow_id: Uuid,
        entity_id: Uuid,
    ) -> EngineResult<bool> {
        Ok(self.inner.read().await.executions.values().any(|e| {
            e.workflow_id == workflow_id
                && e.entity_id == entity_id
                && !matches!(
                    e.status,
                    ExecutionStatus::Failed | ExecutionStatus::Skipped
                )
        }))
    }

    async fn insert_task(&self, task: &ApprovalTask) -> EngineResult<()> {
        self.inner.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> EngineResult<Option<ApprovalTask>> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn find_pending_task(
        &self,
        execution_id: Uuid,
        action_index: i32,
    ) -> EngineResult<Option<ApprovalTask>> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .values()
            .find(|t| {
                t.execution_id == execution_id
                    && t.action_index == action_index
                    && t.status == ApprovalStatus::Pending
            })
            .cloned())
    }

    async fn pending_tasks(&self, org_id: Uuid) -> EngineResult<Vec<ApprovalTask>> {
        let mut tasks: Vec<ApprovalTask> = self
            .inner
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.org_id == org_id && t.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.due_date);
        Ok(tasks)
    }

    async fn decide_task(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decided_by: Option<Uuid>,
    ) -> EngineResult<ApprovalTask> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(EngineError::TaskNotFound(id))?;
        if task.status != ApprovalStatus::Pending {
            return Err(EngineError::ApprovalConflict(id));
        }
        task.status = status;
        task.decided_by = decided_by;
        task.resolved_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn claim_due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        claimant: &str,
    ) -> EngineResult<Vec<ApprovalTask>> {
        let stale = now - Duration::minutes(CLAIM_LEASE_MINUTES);
        let mut inner = self.inner.write().await;
        let due: Vec<Uuid> = inner
            .tasks
            .values()
            .filter(|t| {
                t.status == ApprovalStatus::Pending
                    && t.due_date < now
                    && (t.claimed_by.is_none() || t.claimed_at.map_or(true, |at| at < stale))
            })
            .take(limit.max(0) as usize)
            .map(|t| t.id)
            .collect();

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(task) = inner.tasks.get_mut(&id) {
                task.claimed_by = Some(claimant.to_string());
                task.claimed_at = Some(now);
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn claim_paused_execution(&self, id: Uuid) -> EngineResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.executions.get_mut(&id) {
            Some(execution) if execution.status == ExecutionStatus::Paused => {
                execution.status = ExecutionStatus::Running;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resumable_executions(
        &self,
        limit: i64,
    ) -> EngineResult<Vec<(WorkflowExecution, ApprovalTask)>> {
        let inner = self.inner.read().await;
        let mut pairs = Vec::new();
        for execution in inner
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Paused)
        {
            let Some(index) = execution.paused_at_index else {
                continue;
            };
            let resolved = inner.tasks.values().find(|t| {
                t.execution_id == execution.id
                    && t.action_index == index
                    && t.status != ApprovalStatus::Pending
            });
            if let Some(task) = resolved {
                pairs.push((execution.clone(), task.clone()));
                if pairs.len() as i64 >= limit {
                    break;
                }
            }
        }
        Ok(pairs)
    }
}
