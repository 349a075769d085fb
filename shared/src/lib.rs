// Cadence Shared - Record types visible outside the automation engine
//
// These are the shapes the engine exposes to UI, task-list, and
// notification layers. The approval payload snapshot deliberately has
// no type here: approval tasks cross this boundary as preview text
// only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Partial,
    Failed,
    Skipped,
    Paused,
    Canceled,
    Expired,
}

impl ExecutionStatus {
    /// Paused is the only non-terminal status that survives a process
    /// restart; Running exists only while the action loop is live.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }
}

/// Lifecycle of one approval task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Completed,
    Expired,
    Canceled,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
        }
    }
}

/// An approval task as surfaced to approvers and task lists.
///
/// Carries the sanitized preview only; the data needed to execute the
/// gated action stays inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTaskView {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub action_index: i32,
    pub owner_id: Uuid,
    pub due_date: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

/// Summary of one execution for history listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub entity_kind: String,
    pub entity_id: Uuid,
    pub status: ExecutionStatus,
    pub matched_conditions: bool,
    pub actions_total: i32,
    pub actions_executed: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// A notification raised toward a user. Delivery is handled by an
/// external service; the engine only constructs the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub kind: String,
}

impl NotificationMessage {
    pub fn new(user_id: Uuid, title: &str, body: &str, kind: &str) -> Self {
        Self {
            user_id,
            title: title.to_string(),
            body: body.to_string(),
            kind: kind.to_string(),
        }
    }
}
