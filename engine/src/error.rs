// Engine errors - the failure taxonomy of the automation engine
//
// Condition coercion failures and approval timeouts are states, not
// errors; they never appear here. Nothing inside the action loop or
// the sweeps is allowed to let one of these escape to the caller of
// `handle_event` - failures there become `failed` executions instead.

use thiserror::Error;
use uuid::Uuid;

use cadence_shared::ExecutionStatus;

use crate::workflows::actions::ActionType;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed workflow configuration, rejected at save time.
    #[error("invalid workflow configuration: {0}")]
    Validation(String),

    /// The event's hop count through workflow-triggered-workflow
    /// chains exceeds the configured maximum.
    #[error("cascade depth {depth} exceeds the configured maximum {max}")]
    CascadeDepthExceeded { depth: i32, max: i32 },

    /// A one-time workflow already produced a blocking execution for
    /// this entity.
    #[error("workflow {workflow_id} already executed for entity {entity_id}")]
    DuplicateExecution { workflow_id: Uuid, entity_id: Uuid },

    #[error("action {action_type} at index {index} failed: {message}")]
    ActionFailed {
        action_type: ActionType,
        index: i32,
        message: String,
    },

    /// A decision arrived for a task that is no longer pending.
    #[error("approval task {0} is no longer pending")]
    ApprovalConflict(Uuid),

    #[error("approval task {0} not found")]
    TaskNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// Retry is only valid for failed or expired executions.
    #[error("execution is not retryable from status {0:?}")]
    NotRetryable(ExecutionStatus),

    #[error("no approver could be resolved for the gated action")]
    NoApprover,

    #[error("storage error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
