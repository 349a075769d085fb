// Collaborator Services - narrow interfaces the engine calls out through
//
// The engine never constructs side effects itself; every outbound
// effect goes through one of these traits so deployments can plug in
// their mailer, task system, and record services.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use uuid::Uuid;

use cadence_shared::NotificationMessage;

use crate::workflows::triggers::EntityKind;

type ServiceResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> ServiceResult<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: NotificationMessage) -> ServiceResult<()>;
}

#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn create_task(
        &self,
        org_id: Uuid,
        owner_id: Uuid,
        title: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> ServiceResult<Uuid>;
}

/// Mutations against the business records the engine automates over.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn assign_entity(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        assignee_id: Uuid,
    ) -> ServiceResult<()>;

    async fn update_field(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        field: &str,
        value: Value,
    ) -> ServiceResult<()>;

    async fn add_note(&self, kind: EntityKind, entity_id: Uuid, text: &str) -> ServiceResult<()>;
}

/// Directory lookups used by the approval gate.
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    /// The user holding `role` in the organization, if any.
    async fn resolve_role(&self, org_id: Uuid, role: &str) -> ServiceResult<Option<Uuid>>;

    /// The user's preferred timezone for deadline arithmetic.
    async fn timezone_of(&self, _user_id: Uuid) -> ServiceResult<Option<Tz>> {
        Ok(None)
    }
}

/// The full set of outbound services, handed to the executor registry
/// and the approval gate at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub mailer: Arc<dyn Mailer>,
    pub notifier: Arc<dyn Notifier>,
    pub tasks: Arc<dyn TaskSink>,
    pub records: Arc<dyn RecordService>,
    pub approvers: Arc<dyn ApproverDirectory>,
}

/// Log-only collaborator set for the standalone sweep worker, which
/// only needs the notifier surface. Deployments that run actions embed
/// the engine as a library and wire their own services.
pub mod log_only {
    use super::*;
    use tracing::info;

    struct LogMailer;

    #[async_trait]
    impl Mailer for LogMailer {
        async fn send_email(&self, to: &str, subject: &str, _body: &str) -> ServiceResult<()> {
            info!(%to, %subject, "email (log only)");
            Ok(())
        }
    }

    struct LogNotifier;

    #[async_trait]
    impl Notifier for LogNotifier {
        async fn notify(&self, message: NotificationMessage) -> ServiceResult<()> {
            info!(user_id = %message.user_id, title = %message.title, kind = %message.kind, "notification (log only)");
            Ok(())
        }
    }

    struct LogTaskSink;

    #[async_trait]
    impl TaskSink for LogTaskSink {
        async fn create_task(
            &self,
            org_id: Uuid,
            owner_id: Uuid,
            title: &str,
            _due_date: Option<DateTime<Utc>>,
        ) -> ServiceResult<Uuid> {
            info!(%org_id, %owner_id, %title, "task (log only)");
            Ok(Uuid::new_v4())
        }
    }

    struct LogRecords;

    #[async_trait]
    impl RecordService for LogRecords {
        async fn assign_entity(
            &self,
            kind: EntityKind,
            entity_id: Uuid,
            assignee_id: Uuid,
        ) -> ServiceResult<()> {
            info!(%kind, %entity_id, %assignee_id, "assignment (log only)");
            Ok(())
        }

        async fn update_field(
            &self,
            kind: EntityKind,
            entity_id: Uuid,
            field: &str,
            _value: Value,
        ) -> ServiceResult<()> {
            info!(%kind, %entity_id, %field, "field update (log only)");
            Ok(())
        }

        async fn add_note(
            &self,
            kind: EntityKind,
            entity_id: Uuid,
            _text: &str,
        ) -> ServiceResult<()> {
            info!(%kind, %entity_id, "note (log only)");
            Ok(())
        }
    }

    struct LogDirectory;

    #[async_trait]
    impl ApproverDirectory for LogDirectory {
        async fn resolve_role(&self, _org_id: Uuid, _role: &str) -> ServiceResult<Option<Uuid>> {
            Ok(None)
        }
    }

    pub fn collaborators() -> Collaborators {
        Collaborators {
            mailer: Arc::new(LogMailer),
            notifier: Arc::new(LogNotifier),
            tasks: Arc::new(LogTaskSink),
            records: Arc::new(LogRecords),
            approvers: Arc::new(LogDirectory),
        }
    }
}
