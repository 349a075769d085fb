// Action Executors - dispatch from action configs to collaborator services

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cadence_shared::NotificationMessage;

use crate::error::{EngineError, EngineResult};
use crate::services::{Collaborators, Mailer, Notifier, RecordService, TaskSink};
use crate::workflows::actions::ActionType;
use crate::workflows::triggers::EntityKind;

type ExecResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Everything an executor may rely on. The snapshot is the entity as
/// it was at trigger time; it is never re-fetched, so a gated action
/// approved days later still sees the state that matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub org_id: Uuid,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub user_id: Option<Uuid>,
    pub snapshot: Value,
    pub depth: i32,
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// Reject malformed configs when the workflow is saved.
    fn validate_config(&self, _config: &Value) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> ExecResult<Value>;
}

/// Maps action types to their executors.
pub struct ExecutorRegistry {
    executors: HashMap<ActionType, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// The full built-in executor set wired to the given services.
    pub fn standard(services: &Collaborators) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SendEmailExecutor {
            mailer: services.mailer.clone(),
        }));
        registry.register(Arc::new(CreateTaskExecutor {
            tasks: services.tasks.clone(),
        }));
        registry.register(Arc::new(AssignEntityExecutor {
            records: services.records.clone(),
        }));
        registry.register(Arc::new(SendNotificationExecutor {
            notifier: services.notifier.clone(),
        }));
        registry.register(Arc::new(UpdateFieldExecutor {
            records: services.records.clone(),
        }));
        registry.register(Arc::new(AddNoteExecutor {
            records: services.records.clone(),
        }));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.action_type(), executor);
    }

    pub fn get(&self, action_type: ActionType) -> EngineResult<Arc<dyn ActionExecutor>> {
        self.executors.get(&action_type).cloned().ok_or_else(|| {
            EngineError::Validation(format!("no executor registered for '{action_type}'"))
        })
    }

    pub fn validate(&self, action_type: ActionType, config: &Value) -> EngineResult<()> {
        self.get(action_type)?.validate_config(config)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render `{{field}}` placeholders in every string inside a config
/// from the event snapshot. Unknown fields render as empty strings.
pub fn render_templates(config: &Value, snapshot: &Value) -> Value {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid regex"));

    fn render(value: &Value, snapshot: &Value, re: &Regex) -> Value {
        match value {
            Value::String(text) => {
                let rendered = re.replace_all(text, |caps: &regex::Captures| {
                    match snapshot.get(&caps[1]) {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Null) | None => String::new(),
                        Some(other) => other.to_string(),
                    }
                });
                Value::String(rendered.into_owned())
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| render(v, snapshot, re)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), render(v, snapshot, re)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    render(config, snapshot, re)
}

fn require_str<'a>(config: &'a Value, key: &str) -> ExecResult<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("config is missing '{key}'").into())
}

fn require_uuid(config: &Value, key: &str) -> ExecResult<Uuid> {
    require_str(config, key)?
        .parse::<Uuid>()
        .map_err(|e| format!("config '{key}' is not a valid id: {e}").into())
}

fn check_str(config: &Value, key: &str) -> EngineResult<()> {
    match config.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(()),
        _ => Err(EngineError::Validation(format!(
            "action config requires a non-empty '{key}'"
        ))),
    }
}

struct SendEmailExecutor {
    mailer: Arc<dyn Mailer>,
}

#[async_trait]
impl ActionExecutor for SendEmailExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::SendEmail
    }

    fn validate_config(&self, config: &Value) -> EngineResult<()> {
        check_str(config, "to")?;
        check_str(config, "subject")
    }

    async fn execute(&self, config: &Value, _ctx: &ExecutionContext) -> ExecResult<Value> {
        let to = require_str(config, "to")?;
        let subject = require_str(config, "subject")?;
        let body = config.get("body").and_then(Value::as_str).unwrap_or("");
        self.mailer.send_email(to, subject, body).await?;
        Ok(serde_json::json!({ "to": to, "subject": subject }))
    }
}

struct CreateTaskExecutor {
    tasks: Arc<dyn TaskSink>,
}

#[async_trait]
impl ActionExecutor for CreateTaskExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::CreateTask
    }

    fn validate_config(&self, config: &Value) -> EngineResult<()> {
        check_str(config, "title")?;
        check_str(config, "owner_id")
    }

    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> ExecResult<Value> {
        let title = require_str(config, "title")?;
        let owner_id = require_uuid(config, "owner_id")?;
        let due_date = config
            .get("due_in_hours")
            .and_then(Value::as_u64)
            .map(|h| Utc::now() + Duration::hours(h as i64));
        let task_id = self
            .tasks
            .create_task(ctx.org_id, owner_id, title, due_date)
            .await?;
        Ok(serde_json::json!({ "task_id": task_id }))
    }
}

struct AssignEntityExecutor {
    records: Arc<dyn RecordService>,
}

#[async_trait]
impl ActionExecutor for AssignEntityExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::AssignEntity
    }

    fn validate_config(&self, config: &Value) -> EngineResult<()> {
        check_str(config, "assignee_id")
    }

    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> ExecResult<Value> {
        let assignee_id = require_uuid(config, "assignee_id")?;
        self.records
            .assign_entity(ctx.entity_kind, ctx.entity_id, assignee_id)
            .await?;
        Ok(serde_json::json!({ "assignee_id": assignee_id }))
    }
}

struct SendNotificationExecutor {
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl ActionExecutor for SendNotificationExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::SendNotification
    }

    fn validate_config(&self, config: &Value) -> EngineResult<()> {
        check_str(config, "user_id")?;
        check_str(config, "title")
    }

    async fn execute(&self, config: &Value, _ctx: &ExecutionContext) -> ExecResult<Value> {
        let user_id = require_uuid(config, "user_id")?;
        let title = require_str(config, "title")?;
        let body = config.get("body").and_then(Value::as_str).unwrap_or("");
        self.notifier
            .notify(NotificationMessage::new(user_id, title, body, "workflow"))
            .await?;
        Ok(serde_json::json!({ "user_id": user_id }))
    }
}

struct UpdateFieldExecutor {
    records: Arc<dyn RecordService>,
}

#[async_trait]
impl ActionExecutor for UpdateFieldExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::UpdateField
    }

    fn validate_config(&self, config: &Value) -> EngineResult<()> {
        check_str(config, "field")?;
        if config.get("value").is_none() {
            return Err(EngineError::Validation(
                "action config requires a 'value'".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> ExecResult<Value> {
        let field = require_str(config, "field")?;
        let value = config
            .get("value")
            .cloned()
            .ok_or("config is missing 'value'")?;
        self.records
            .update_field(ctx.entity_kind, ctx.entity_id, field, value.clone())
            .await?;
        Ok(serde_json::json!({ "field": field, "value": value }))
    }
}

struct AddNoteExecutor {
    records: Arc<dyn RecordService>,
}

#[async_trait]
impl ActionExecutor for AddNoteExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::AddNote
    }

    fn validate_config(&self, config: &Value) -> EngineResult<()> {
        check_str(config, "text")
    }

    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> ExecResult<Value> {
        let text = require_str(config, "text")?;
        self.records
            .add_note(ctx.entity_kind, ctx.entity_id, text)
            .await?;
        Ok(serde_json::json!({ "length": text.len() }))
    }
}
