// Engine Scheduler - runs the sweeps on a fixed interval
//
// The interval is a deployment concern; sweep semantics live in
// `sweep.rs`. Deployments with their own scheduler can skip this and
// call the sweep entry points directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::jobs::sweep::SweepWorker;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for JobError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}

/// One sweep run, kept in a bounded in-memory ring for inspection.
#[derive(Debug, Clone)]
pub struct JobExecutionLog {
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub message: String,
}

const MAX_LOG_ENTRIES: usize = 100;

pub struct EngineScheduler {
    scheduler: JobScheduler,
    worker: Arc<SweepWorker>,
    logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl EngineScheduler {
    pub async fn new(worker: Arc<SweepWorker>) -> Result<Self, JobError> {
        Ok(Self {
            scheduler: JobScheduler::new().await?,
            worker,
            logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Register both sweeps at the given interval and start ticking.
    pub async fn start(&self, interval_minutes: u32) -> Result<(), JobError> {
        let expr = format!("0 */{} * * * *", interval_minutes.max(1));

        for job_name in ["expiry_sweep", "resume_sweep"] {
            let worker = self.worker.clone();
            let logs = self.logs.clone();
            let job = Job::new_async(expr.as_str(), move |_id, _scheduler| {
                let worker = worker.clone();
                let logs = logs.clone();
                Box::pin(async move {
                    run_and_log(&worker, &logs, job_name).await;
                })
            })
            .map_err(JobError::from)?;
            self.scheduler.add(job).await?;
        }

        self.scheduler.start().await?;
        info!(interval_minutes, "engine scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        self.scheduler.shutdown().await?;
        info!("engine scheduler stopped");
        Ok(())
    }

    /// Run one sweep immediately, outside the schedule.
    pub async fn run_job_now(&self, job_name: &str) -> Result<(), JobError> {
        match job_name {
            "expiry_sweep" | "resume_sweep" => {
                run_and_log(&self.worker, &self.logs, job_name).await;
                Ok(())
            }
            other => Err(JobError::UnknownJob(other.to_string())),
        }
    }

    pub async fn recent_logs(&self) -> Vec<JobExecutionLog> {
        self.logs.read().await.clone()
    }
}

async fn run_and_log(
    worker: &SweepWorker,
    logs: &RwLock<Vec<JobExecutionLog>>,
    job_name: &str,
) {
    let started_at = Utc::now();
    let outcome = match job_name {
        "expiry_sweep" => worker.run_expiry_sweep().await,
        _ => worker.run_resume_sweep().await,
    };

    let (success, message) = match outcome {
        Ok(result) => (
            result.errors.is_empty(),
            format!(
                "processed {}, skipped {}, errors {}",
                result.processed,
                result.skipped,
                result.errors.len()
            ),
        ),
        Err(e) => {
            error!(job_name, error = %e, "sweep pass failed");
            (false, e.to_string())
        }
    };

    let mut logs = logs.write().await;
    logs.push(JobExecutionLog {
        job_name: job_name.to_string(),
        started_at,
        completed_at: Utc::now(),
        success,
        message,
    });
    if logs.len() > MAX_LOG_ENTRIES {
        let excess = logs.len() - MAX_LOG_ENTRIES;
        logs.drain(0..excess);
    }
}
