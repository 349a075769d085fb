// Cadence Engine - workflow automation with human approval gates
//
// Record services raise domain events; enabled workflows match on
// trigger type and conditions, then run their action chains through
// pluggable executors. Actions can be gated behind human approval with
// business-hours deadlines, expiry sweeps, and explicit retry.

pub mod config;
pub mod database;
pub mod error;
pub mod hours;
pub mod jobs;
pub mod services;
pub mod store;
pub mod workflows;

pub use config::{EngineConfig, FailurePolicy};
pub use error::{EngineError, EngineResult};
pub use hours::BusinessCalendar;
pub use services::Collaborators;
pub use store::{EngineStore, MemoryStore, PgStore};
pub use workflows::{DomainEvent, Workflow, WorkflowEngine};

#[cfg(test)]
mod tests;
