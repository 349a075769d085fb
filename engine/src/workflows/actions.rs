// Workflow Actions - the side effects a workflow can perform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    CreateTask,
    AssignEntity,
    SendNotification,
    UpdateField,
    AddNote,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::CreateTask => "create_task",
            Self::AssignEntity => "assign_entity",
            Self::SendNotification => "send_notification",
            Self::UpdateField => "update_field",
            Self::AddNote => "add_note",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step in a workflow's action list. The config shape depends on
/// the action type; `{{field}}` placeholders in string values are
/// rendered from the event snapshot at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub name: String,
    pub action_type: ActionType,
    pub config: Value,
    /// Gated actions pause the execution behind an approval task.
    #[serde(default)]
    pub requires_approval: bool,
}

impl Action {
    pub fn new(name: &str, action_type: ActionType, config: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            action_type,
            config,
            requires_approval: false,
        }
    }

    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::new(
            "Send email",
            ActionType::SendEmail,
            serde_json::json!({
                "to": to,
                "subject": subject,
                "body": body,
            }),
        )
    }

    pub fn create_task(title: &str, owner_id: Uuid, due_in_hours: u32) -> Self {
        Self::new(
            "Create task",
            ActionType::CreateTask,
            serde_json::json!({
                "title": title,
                "owner_id": owner_id.to_string(),
                "due_in_hours": due_in_hours,
            }),
        )
    }

    pub fn assign_entity(assignee_id: Uuid) -> Self {
        Self::new(
            "Assign record",
            ActionType::AssignEntity,
            serde_json::json!({
                "assignee_id": assignee_id.to_string(),
            }),
        )
    }

    pub fn send_notification(user_id: Uuid, title: &str, body: &str) -> Self {
        Self::new(
            "Send notification",
            ActionType::SendNotification,
            serde_json::json!({
                "user_id": user_id.to_string(),
                "title": title,
                "body": body,
            }),
        )
    }

    pub fn update_field(field: &str, value: Value) -> Self {
        Self::new(
            "Update field",
            ActionType::UpdateField,
            serde_json::json!({
                "field": field,
                "value": value,
            }),
        )
    }

    pub fn add_note(text: &str) -> Self {
        Self::new(
            "Add note",
            ActionType::AddNote,
            serde_json::json!({
                "text": text,
            }),
        )
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Require human approval before this action runs.
    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Nominate a specific approver for the gate.
    pub fn with_approver(mut self, approver_id: Uuid) -> Self {
        if let Some(map) = self.config.as_object_mut() {
            map.insert(
                "approver_id".to_string(),
                Value::String(approver_id.to_string()),
            );
        }
        self.requires_approval = true;
        self
    }

    /// Route the approval to whoever holds `role` in the organization.
    pub fn with_approver_role(mut self, role: &str) -> Self {
        if let Some(map) = self.config.as_object_mut() {
            map.insert(
                "approver_role".to_string(),
                Value::String(role.to_string()),
            );
        }
        self.requires_approval = true;
        self
    }
}

/// The recorded result of one action attempt, appended to the
/// execution's `actions_executed` log whether it succeeded or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub index: i32,
    pub action_type: ActionType,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
}

impl ActionOutcome {
    pub fn success(index: i32, action_type: ActionType, output: Value, duration_ms: i64) -> Self {
        Self {
            index,
            action_type,
            success: true,
            output: Some(output),
            error: None,
            duration_ms,
            executed_at: Utc::now(),
        }
    }

    pub fn failure(index: i32, action_type: ActionType, error: String, duration_ms: i64) -> Self {
        Self {
            index,
            action_type,
            success: false,
            output: None,
            error: Some(error),
            duration_ms,
            executed_at: Utc::now(),
        }
    }
}

/// Common action chains.
pub mod presets {
    use super::*;

    /// Notify an owner and assign the record to them.
    pub fn route_to_owner(owner_id: Uuid, notification_title: &str) -> Vec<Action> {
        vec![
            Action::assign_entity(owner_id),
            Action::send_notification(owner_id, notification_title, "A record was routed to you."),
        ]
    }

    /// Welcome email followed by a follow-up task, the email gated
    /// behind approval.
    pub fn gated_welcome(owner_id: Uuid) -> Vec<Action> {
        vec![
            Action::create_task("Review new record", owner_id, 24),
            Action::send_email(
                "{{email}}",
                "Welcome, {{full_name}}",
                "Thanks for reaching out. We will be in touch shortly.",
            )
            .with_approver(owner_id),
        ]
    }
}
