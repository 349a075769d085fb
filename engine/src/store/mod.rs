// Engine Store - durable state behind one async trait
//
// The engine holds no in-memory state across a pause; everything a
// resumed execution needs lives here. `decide_task`, `claim_due_tasks`,
// and `claim_paused_execution` are the compare-and-set points the
// concurrency model leans on.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use cadence_shared::ApprovalStatus;

use crate::error::EngineResult;
use crate::workflows::approvals::ApprovalTask;
use crate::workflows::engine::{Workflow, WorkflowExecution};
use crate::workflows::triggers::{DomainEvent, TriggerType};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A task claim older than this is presumed abandoned (the claiming
/// worker crashed mid-sweep) and may be retaken.
pub const CLAIM_LEASE_MINUTES: i64 = 10;

#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn insert_workflow(&self, workflow: &Workflow) -> EngineResult<()>;
    async fn update_workflow(&self, workflow: &Workflow) -> EngineResult<()>;
    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<Workflow>>;
    async fn enabled_workflows(
        &self,
        org_id: Uuid,
        trigger: TriggerType,
    ) -> EngineResult<Vec<Workflow>>;

    /// Record a dispatched event for audit.
    async fn insert_event(&self, event: &DomainEvent) -> EngineResult<()>;

    async fn insert_execution(&self, execution: &WorkflowExecution) -> EngineResult<()>;
    async fn update_execution(&self, execution: &WorkflowExecution) -> EngineResult<()>;
    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<WorkflowExecution>>;
    async fn executions_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> EngineResult<Vec<WorkflowExecution>>;

    /// One-time dedup check: does any execution exist for this pair in
    /// a state other than `failed` or `skipped`?
    async fn has_blocking_execution(
        &self,
        workflow_id: Uuid,
        entity_id: Uuid,
    ) -> EngineResult<bool>;

    async fn insert_task(&self, task: &ApprovalTask) -> EngineResult<()>;
    async fn get_task(&self, id: Uuid) -> EngineResult<Option<ApprovalTask>>;
    async fn find_pending_task(
        &self,
        execution_id: Uuid,
        action_index: i32,
    ) -> EngineResult<Option<ApprovalTask>>;
    async fn pending_tasks(&self, org_id: Uuid) -> EngineResult<Vec<ApprovalTask>>;

    /// Resolve a pending task to a terminal status. Fails with
    /// `ApprovalConflict` if the task is no longer pending, or
    /// `TaskNotFound` if it does not exist.
    async fn decide_task(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decided_by: Option<Uuid>,
    ) -> EngineResult<ApprovalTask>;

    /// Atomically claim up to `limit` pending tasks past their due
    /// date. A task whose claim is still within the lease window is
    /// never returned twice; a stale claim is retaken.
    async fn claim_due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        claimant: &str,
    ) -> EngineResult<Vec<ApprovalTask>>;

    /// Compare-and-set the execution from `paused` to `running`.
    /// Returns false when it is no longer paused, which means another
    /// worker is already driving it forward.
    async fn claim_paused_execution(&self, id: Uuid) -> EngineResult<bool>;

    /// Paused executions whose approval task has already resolved,
    /// paired with that task.
    async fn resumable_executions(
        &self,
        limit: i64,
    ) -> EngineResult<Vec<(WorkflowExecution, ApprovalTask)>>;
}
