// Workflow module - triggers, conditions, actions, approvals, engine

pub mod actions;
pub mod approvals;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod triggers;

pub use actions::{Action, ActionOutcome, ActionType};
pub use approvals::{ApprovalGate, ApprovalPayload, ApprovalTask};
pub use conditions::{Condition, ConditionLogic, ConditionOperator};
pub use engine::{RecurrenceMode, Workflow, WorkflowEngine, WorkflowExecution, WorkflowScope};
pub use executor::{ActionExecutor, ExecutionContext, ExecutorRegistry};
pub use triggers::{DomainEvent, EntityKind, EventSource, TriggerType};
