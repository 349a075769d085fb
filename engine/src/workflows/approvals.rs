// Approval Gate - human-in-the-loop pause points in an action chain
//
// The payload snapshot holds the fully rendered action config and the
// execution context, which can contain PII captured at trigger time.
// It exists only to re-invoke the deferred executor after approval and
// is never exposed outside the engine: everything surfaced to the UI
// goes through `view()`, which carries the sanitized preview only.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use cadence_shared::{ApprovalStatus, ApprovalTaskView, NotificationMessage};

use crate::error::{EngineError, EngineResult};
use crate::hours::BusinessCalendar;
use crate::services::{ApproverDirectory, Notifier};
use crate::store::EngineStore;
use crate::workflows::actions::{Action, ActionType};
use crate::workflows::executor::ExecutionContext;

/// Everything needed to run the deferred action later, exactly as it
/// would have run at pause time.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApprovalPayload {
    /// The gated action with its config already rendered.
    pub action: Action,
    pub context: ExecutionContext,
}

// The payload may hold PII; keep it out of logs.
impl std::fmt::Debug for ApprovalPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalPayload")
            .field("action_type", &self.action.action_type)
            .field("execution_id", &self.context.execution_id)
            .field("config", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: Uuid,
    pub execution_id: Uuid,
    /// Index of the gated action in the workflow's action list.
    pub action_index: i32,
    pub org_id: Uuid,
    /// The approver the task is assigned to.
    pub owner_id: Uuid,
    /// Who triggered the paused execution, for expiry notifications.
    pub requested_by: Option<Uuid>,
    pub due_date: DateTime<Utc>,
    pub status: ApprovalStatus,
    /// Sanitized human-readable summary of the gated action.
    pub preview: String,
    pub payload: ApprovalPayload,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
    /// Sweep-worker claim marker.
    pub claimed_by: Option<String>,
    /// When the claim was taken; stale claims past the lease window
    /// are retaken by later sweeps.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl ApprovalTask {
    /// The external projection of this task. The payload never crosses
    /// this boundary.
    pub fn view(&self) -> ApprovalTaskView {
        ApprovalTaskView {
            id: self.id,
            execution_id: self.execution_id,
            action_index: self.action_index,
            owner_id: self.owner_id,
            due_date: self.due_date,
            status: self.status,
            preview: self.preview.clone(),
            created_at: self.created_at,
        }
    }
}

/// Creates approval tasks for gated actions and applies decisions.
pub struct ApprovalGate {
    store: Arc<dyn EngineStore>,
    approvers: Arc<dyn ApproverDirectory>,
    notifier: Arc<dyn Notifier>,
    calendar: BusinessCalendar,
    timeout_hours: u32,
    default_tz: Tz,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<dyn EngineStore>,
        approvers: Arc<dyn ApproverDirectory>,
        notifier: Arc<dyn Notifier>,
        calendar: BusinessCalendar,
        timeout_hours: u32,
        default_tz: Tz,
    ) -> Self {
        Self {
            store,
            approvers,
            notifier,
            calendar,
            timeout_hours,
            default_tz,
        }
    }

    /// Open an approval task for a gated action. The action's config
    /// must already be rendered; it is stored verbatim in the payload.
    pub async fn open(
        &self,
        action: Action,
        action_index: i32,
        context: ExecutionContext,
        requested_by: Option<Uuid>,
    ) -> EngineResult<ApprovalTask> {
        if let Some(existing) = self
            .store
            .find_pending_task(context.execution_id, action_index)
            .await?
        {
            return Err(EngineError::ApprovalConflict(existing.id));
        }

        let owner_id = self.resolve_approver(&action, context.org_id).await?;
        let tz = match self.approvers.timezone_of(owner_id).await {
            Ok(Some(tz)) => tz,
            Ok(None) => self.default_tz,
            Err(e) => {
                warn!(%owner_id, error = %e, "timezone lookup failed, using default");
                self.default_tz
            }
        };
        let due_date = self
            .calendar
            .add_business_hours(Utc::now(), self.timeout_hours, tz);

        let task = ApprovalTask {
            id: Uuid::new_v4(),
            execution_id: context.execution_id,
            action_index,
            org_id: context.org_id,
            owner_id,
            requested_by,
            due_date,
            status: ApprovalStatus::Pending,
            preview: sanitize_preview(&action),
            payload: ApprovalPayload { action, context },
            created_at: Utc::now(),
            resolved_at: None,
            decided_by: None,
            claimed_by: None,
            claimed_at: None,
        };
        self.store.insert_task(&task).await?;

        let message = NotificationMessage::new(
            owner_id,
            "Approval requested",
            &format!("{} (due {})", task.preview, task.due_date.format("%Y-%m-%d %H:%M UTC")),
            "approval_request",
        );
        if let Err(e) = self.notifier.notify(message).await {
            warn!(task_id = %task.id, error = %e, "approval notification failed");
        }

        Ok(task)
    }

    /// Mark the task completed. Fails with `ApprovalConflict` if the
    /// task already resolved.
    pub async fn approve(&self, task_id: Uuid, decided_by: Uuid) -> EngineResult<ApprovalTask> {
        self.store
            .decide_task(task_id, ApprovalStatus::Completed, Some(decided_by))
            .await
    }

    /// Mark the task canceled. Same pending guard as `approve`.
    pub async fn reject(&self, task_id: Uuid, decided_by: Uuid) -> EngineResult<ApprovalTask> {
        self.store
            .decide_task(task_id, ApprovalStatus::Canceled, Some(decided_by))
            .await
    }

    /// Tell the requester their gated action expired unapproved.
    pub async fn notify_expiry(&self, requester: Uuid, task: &ApprovalTask) {
        let message = NotificationMessage::new(
            requester,
            "Approval expired",
            &format!("{} was not approved before its deadline.", task.preview),
            "approval_expired",
        );
        if let Err(e) = self.notifier.notify(message).await {
            warn!(task_id = %task.id, error = %e, "expiry notification failed");
        }
    }

    /// Explicit owner on the action config wins, then role lookup.
    async fn resolve_approver(&self, action: &Action, org_id: Uuid) -> EngineResult<Uuid> {
        if let Some(id) = action.config.get("approver_id").and_then(Value::as_str) {
            return id
                .parse::<Uuid>()
                .map_err(|_| EngineError::Validation(format!("invalid approver_id '{id}'")));
        }
        if let Some(role) = action.config.get("approver_role").and_then(Value::as_str) {
            let resolved = self
                .approvers
                .resolve_role(org_id, role)
                .await
                .map_err(|e| EngineError::Store(e.to_string()))?;
            return resolved.ok_or(EngineError::NoApprover);
        }
        Err(EngineError::NoApprover)
    }
}

/// Build a human-readable one-liner for the gated action with emails
/// and phone numbers masked. Free-text bodies are never included.
pub fn sanitize_preview(action: &Action) -> String {
    let text = match action.action_type {
        ActionType::SendEmail => {
            let to = action.config.get("to").and_then(Value::as_str).unwrap_or("?");
            let subject = action
                .config
                .get("subject")
                .and_then(Value::as_str)
                .unwrap_or("");
            format!("Send email to {to}: \"{subject}\"")
        }
        ActionType::CreateTask => {
            let title = action
                .config
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("");
            format!("Create task \"{title}\"")
        }
        ActionType::AssignEntity => "Assign the record to a new owner".to_string(),
        ActionType::SendNotification => {
            let title = action
                .config
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("");
            format!("Send in-app notification \"{title}\"")
        }
        ActionType::UpdateField => {
            let field = action
                .config
                .get("field")
                .and_then(Value::as_str)
                .unwrap_or("?");
            format!("Update field '{field}'")
        }
        ActionType::AddNote => "Add a note to the record".to_string(),
    };
    mask_pii(&text)
}

/// Mask email addresses and phone numbers in preview text.
pub fn mask_pii(text: &str) -> String {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    static PHONE: OnceLock<Regex> = OnceLock::new();
    let email = EMAIL.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
    });
    let phone = PHONE
        .get_or_init(|| Regex::new(r"\+?\d[\d\s().-]{5,}\d").expect("valid regex"));

    let masked = email.replace_all(text, |caps: &regex::Captures| {
        let addr = &caps[0];
        match addr.split_once('@') {
            Some((local, domain)) => {
                let first = local.chars().next().unwrap_or('*');
                format!("{first}***@{domain}")
            }
            None => "***".to_string(),
        }
    });
    phone
        .replace_all(&masked, |caps: &regex::Captures| {
            let digits: Vec<char> = caps[0].chars().filter(|c| c.is_ascii_digit()).collect();
            let tail: String = digits.iter().rev().take(2).rev().collect();
            format!("***{tail}")
        })
        .into_owned()
}
