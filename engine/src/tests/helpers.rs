// Test helpers - an engine wired to recording fakes over MemoryStore

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use uuid::Uuid;

use cadence_shared::NotificationMessage;

use crate::config::EngineConfig;
use crate::services::{ApproverDirectory, Collaborators, Mailer, Notifier, RecordService, TaskSink};
use crate::store::MemoryStore;
use crate::workflows::engine::WorkflowEngine;
use crate::workflows::triggers::EntityKind;

type ServiceResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<SentEmail>>,
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
}

impl FakeMailer {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Slow sends down to widen race windows in concurrency tests.
    pub fn set_delay_ms(&self, millis: u64) {
        self.delay_ms.store(millis, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> ServiceResult<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err("smtp unavailable".into());
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub notifications: Mutex<Vec<NotificationMessage>>,
}

impl FakeNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, message: NotificationMessage) -> ServiceResult<()> {
        self.notifications.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub org_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct FakeTaskSink {
    pub created: Mutex<Vec<CreatedTask>>,
}

#[async_trait]
impl TaskSink for FakeTaskSink {
    async fn create_task(
        &self,
        org_id: Uuid,
        owner_id: Uuid,
        title: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> ServiceResult<Uuid> {
        self.created.lock().unwrap().push(CreatedTask {
            org_id,
            owner_id,
            title: title.to_string(),
            due_date,
        });
        Ok(Uuid::new_v4())
    }
}

#[derive(Default)]
pub struct FakeRecords {
    pub assignments: Mutex<Vec<(EntityKind, Uuid, Uuid)>>,
    pub updates: Mutex<Vec<(EntityKind, Uuid, String, Value)>>,
    pub notes: Mutex<Vec<(EntityKind, Uuid, String)>>,
}

#[async_trait]
impl RecordService for FakeRecords {
    async fn assign_entity(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        assignee_id: Uuid,
    ) -> ServiceResult<()> {
        self.assignments
            .lock()
            .unwrap()
            .push((kind, entity_id, assignee_id));
        Ok(())
    }

    async fn update_field(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        field: &str,
        value: Value,
    ) -> ServiceResult<()> {
        self.updates
            .lock()
            .unwrap()
            .push((kind, entity_id, field.to_string(), value));
        Ok(())
    }

    async fn add_note(&self, kind: EntityKind, entity_id: Uuid, text: &str) -> ServiceResult<()> {
        self.notes
            .lock()
            .unwrap()
            .push((kind, entity_id, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub roles: Mutex<HashMap<String, Uuid>>,
    pub timezone: Option<Tz>,
}

impl FakeDirectory {
    pub fn with_role(self, role: &str, user_id: Uuid) -> Self {
        self.roles.lock().unwrap().insert(role.to_string(), user_id);
        self
    }
}

#[async_trait]
impl ApproverDirectory for FakeDirectory {
    async fn resolve_role(&self, _org_id: Uuid, role: &str) -> ServiceResult<Option<Uuid>> {
        Ok(self.roles.lock().unwrap().get(role).copied())
    }

    async fn timezone_of(&self, _user_id: Uuid) -> ServiceResult<Option<Tz>> {
        Ok(self.timezone)
    }
}

/// A full engine over `MemoryStore` with every collaborator recorded.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<WorkflowEngine>,
    pub mailer: Arc<FakeMailer>,
    pub notifier: Arc<FakeNotifier>,
    pub tasks: Arc<FakeTaskSink>,
    pub records: Arc<FakeRecords>,
    pub org_id: Uuid,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_directory(EngineConfig::default(), FakeDirectory::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_directory(config, FakeDirectory::default())
    }

    pub fn with_directory(config: EngineConfig, directory: FakeDirectory) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(FakeMailer::default());
        let notifier = Arc::new(FakeNotifier::default());
        let tasks = Arc::new(FakeTaskSink::default());
        let records = Arc::new(FakeRecords::default());
        let services = Collaborators {
            mailer: mailer.clone(),
            notifier: notifier.clone(),
            tasks: tasks.clone(),
            records: records.clone(),
            approvers: Arc::new(directory),
        };
        let engine = Arc::new(WorkflowEngine::new(store.clone(), services, config));
        Self {
            store,
            engine,
            mailer,
            notifier,
            tasks,
            records,
            org_id: Uuid::new_v4(),
        }
    }
}
