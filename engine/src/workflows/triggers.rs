// Workflow Triggers - domain events that can start workflow execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle transitions the record services raise events for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    RecordCreated,
    RecordUpdated,
    StatusChanged,
    RecordAssigned,
    DocumentUploaded,
    AppointmentScheduled,
    AppointmentCompleted,
    FormSubmitted,
    MatchCreated,
    NoteAdded,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordCreated => "record_created",
            Self::RecordUpdated => "record_updated",
            Self::StatusChanged => "status_changed",
            Self::RecordAssigned => "record_assigned",
            Self::DocumentUploaded => "document_uploaded",
            Self::AppointmentScheduled => "appointment_scheduled",
            Self::AppointmentCompleted => "appointment_completed",
            Self::FormSubmitted => "form_submitted",
            Self::MatchCreated => "match_created",
            Self::NoteAdded => "note_added",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record types the engine automates over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Case,
    Lead,
    Appointment,
    FormSubmission,
    Document,
    Match,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Case => "case",
            Self::Lead => "lead",
            Self::Appointment => "appointment",
            Self::FormSubmission => "form_submission",
            Self::Document => "document",
            Self::Match => "match",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who raised the event. Workflow-sourced events carry the spawning
/// execution so cascades stay traceable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EventSource {
    User { user_id: Uuid },
    System,
    Workflow { execution_id: Uuid },
}

/// One "this might apply to this entity now" instance, as raised by a
/// record service. The snapshot is a flat key/value map; callers must
/// include every field any condition references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub trigger_type: TriggerType,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub source: EventSource,
    /// Hop count through workflow-triggered-workflow chains.
    pub depth: i32,
    pub snapshot: Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        trigger_type: TriggerType,
        entity_kind: EntityKind,
        entity_id: Uuid,
        org_id: Uuid,
        snapshot: Value,
        source: EventSource,
    ) -> Self {
        let user_id = match &source {
            EventSource::User { user_id } => Some(*user_id),
            _ => None,
        };
        Self {
            event_id: Uuid::new_v4(),
            trigger_type,
            entity_kind,
            entity_id,
            org_id,
            user_id,
            source,
            depth: 0,
            snapshot,
            occurred_at: Utc::now(),
        }
    }

    /// Mark this event as spawned by a running execution, one hop
    /// deeper than its parent.
    pub fn spawned_by(mut self, execution_id: Uuid, parent_depth: i32) -> Self {
        self.source = EventSource::Workflow { execution_id };
        self.depth = parent_depth + 1;
        self.user_id = None;
        self
    }

    /// A record was created.
    pub fn record_created(
        entity_kind: EntityKind,
        entity_id: Uuid,
        org_id: Uuid,
        snapshot: Value,
        source: EventSource,
    ) -> Self {
        Self::new(
            TriggerType::RecordCreated,
            entity_kind,
            entity_id,
            org_id,
            snapshot,
            source,
        )
    }

    /// A record's status changed. The old/new statuses are merged into
    /// the snapshot so conditions can reference them.
    pub fn status_changed(
        entity_kind: EntityKind,
        entity_id: Uuid,
        org_id: Uuid,
        old_status: &str,
        new_status: &str,
        mut snapshot: Value,
        source: EventSource,
    ) -> Self {
        if let Some(map) = snapshot.as_object_mut() {
            map.insert("old_status".to_string(), Value::String(old_status.to_string()));
            map.insert("new_status".to_string(), Value::String(new_status.to_string()));
            map.insert("status".to_string(), Value::String(new_status.to_string()));
        }
        Self::new(
            TriggerType::StatusChanged,
            entity_kind,
            entity_id,
            org_id,
            snapshot,
            source,
        )
    }

    /// A record was assigned to a user.
    pub fn record_assigned(
        entity_kind: EntityKind,
        entity_id: Uuid,
        org_id: Uuid,
        assignee: Uuid,
        mut snapshot: Value,
        source: EventSource,
    ) -> Self {
        if let Some(map) = snapshot.as_object_mut() {
            map.insert(
                "assigned_to".to_string(),
                Value::String(assignee.to_string()),
            );
        }
        Self::new(
            TriggerType::RecordAssigned,
            entity_kind,
            entity_id,
            org_id,
            snapshot,
            source,
        )
    }

    /// A document was uploaded against an entity.
    pub fn document_uploaded(
        entity_id: Uuid,
        org_id: Uuid,
        document_type: &str,
        mut snapshot: Value,
        source: EventSource,
    ) -> Self {
        if let Some(map) = snapshot.as_object_mut() {
            map.insert(
                "document_type".to_string(),
                Value::String(document_type.to_string()),
            );
        }
        Self::new(
            TriggerType::DocumentUploaded,
            EntityKind::Document,
            entity_id,
            org_id,
            snapshot,
            source,
        )
    }

    /// A form submission arrived.
    pub fn form_submitted(entity_id: Uuid, org_id: Uuid, snapshot: Value) -> Self {
        Self::new(
            TriggerType::FormSubmitted,
            EntityKind::FormSubmission,
            entity_id,
            org_id,
            snapshot,
            EventSource::System,
        )
    }
}
