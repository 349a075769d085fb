// Background Jobs - periodic sweeps over approvals and paused executions

pub mod scheduler;
pub mod sweep;

pub use scheduler::{EngineScheduler, JobError, JobExecutionLog};
pub use sweep::{SweepResult, SweepWorker};
