// Sweep Worker - expiry and resume passes over the shared store
//
// Multiple workers may run concurrently; exclusivity comes from the
// store's claim step, not from anything in here. One row's failure is
// logged and counted, never allowed to abort the rest of the pass.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::store::EngineStore;
use crate::workflows::engine::WorkflowEngine;

pub struct SweepWorker {
    engine: Arc<WorkflowEngine>,
    store: Arc<dyn EngineStore>,
    batch_size: i64,
    claimant: String,
}

/// Counters for one sweep pass.
#[derive(Debug, Default)]
pub struct SweepResult {
    pub processed: usize,
    /// Rows that resolved between selection and mutation; benign.
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SweepWorker {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        store: Arc<dyn EngineStore>,
        batch_size: i64,
        claimant: &str,
    ) -> Self {
        Self {
            engine,
            store,
            batch_size,
            claimant: claimant.to_string(),
        }
    }

    /// Expire pending approval tasks past their due date. Each task is
    /// claimed atomically before mutation so two workers never
    /// double-expire the same row.
    pub async fn run_expiry_sweep(&self) -> EngineResult<SweepResult> {
        let claimed = self
            .store
            .claim_due_tasks(Utc::now(), self.batch_size, &self.claimant)
            .await?;
        let mut result = SweepResult::default();

        for task in claimed {
            let task_id = task.id;
            match self.engine.expire_task(&task).await {
                Ok(_) => result.processed += 1,
                // An approval landed between the claim and the expiry.
                Err(EngineError::ApprovalConflict(_)) => result.skipped += 1,
                Err(e) => {
                    warn!(%task_id, error = %e, "expiry failed for task");
                    result.errors.push(format!("task {task_id}: {e}"));
                }
            }
        }

        info!(
            claimant = %self.claimant,
            processed = result.processed,
            skipped = result.skipped,
            errors = result.errors.len(),
            "expiry sweep finished"
        );
        Ok(result)
    }

    /// Drive paused executions whose approval task already resolved.
    /// Covers decisions whose in-process continuation was lost to a
    /// restart or delivery delay.
    pub async fn run_resume_sweep(&self) -> EngineResult<SweepResult> {
        let pairs = self.store.resumable_executions(self.batch_size).await?;
        let mut result = SweepResult::default();

        for (execution, task) in pairs {
            let execution_id = execution.id;
            match self.engine.resume_execution(task).await {
                Ok(_) => result.processed += 1,
                Err(EngineError::ApprovalConflict(_)) => result.skipped += 1,
                Err(e) => {
                    warn!(%execution_id, error = %e, "resume failed for execution");
                    result.errors.push(format!("execution {execution_id}: {e}"));
                }
            }
        }

        info!(
            claimant = %self.claimant,
            processed = result.processed,
            skipped = result.skipped,
            errors = result.errors.len(),
            "resume sweep finished"
        );
        Ok(result)
    }
}
