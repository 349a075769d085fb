// Workflow Conditions - predicate evaluation against event snapshots
//
// `evaluate` is pure and deterministic: no clock, no store, no side
// effects. A value that cannot be coerced for an operator makes that
// single condition false, never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::workflows::triggers::EntityKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Field path into the event snapshot.
    pub field: String,
    pub operator: ConditionOperator,
    /// Comparison value. Ignored by `is_empty` / `is_not_empty`.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
    GreaterThan,
    LessThan,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Value::String(value.to_string()))
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn is_empty(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsEmpty, Value::Null)
    }

    pub fn is_not_empty(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNotEmpty, Value::Null)
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn not_in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::NotIn, Value::Array(values))
    }
}

/// Evaluate a condition list against a snapshot. An empty list is
/// always true: the workflow applies whenever its trigger fires.
pub fn evaluate(conditions: &[Condition], logic: ConditionLogic, snapshot: &Value) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match logic {
        ConditionLogic::And => conditions.iter().all(|c| evaluate_condition(c, snapshot)),
        ConditionLogic::Or => conditions.iter().any(|c| evaluate_condition(c, snapshot)),
    }
}

pub fn evaluate_condition(condition: &Condition, snapshot: &Value) -> bool {
    let field_value = snapshot.get(&condition.field);

    match condition.operator {
        ConditionOperator::IsEmpty => is_empty(field_value),
        ConditionOperator::IsNotEmpty => !is_empty(field_value),
        // Negative operators hold when the field is absent.
        ConditionOperator::NotEquals => match field_value {
            Some(actual) => !values_equal(actual, &condition.value),
            None => true,
        },
        ConditionOperator::NotContains => match field_value {
            Some(actual) => !value_contains(actual, &condition.value),
            None => true,
        },
        ConditionOperator::NotIn => match field_value {
            Some(actual) => !value_in_list(actual, &condition.value),
            None => true,
        },
        ConditionOperator::Equals => {
            field_value.is_some_and(|actual| values_equal(actual, &condition.value))
        }
        ConditionOperator::Contains => {
            field_value.is_some_and(|actual| value_contains(actual, &condition.value))
        }
        ConditionOperator::In => {
            field_value.is_some_and(|actual| value_in_list(actual, &condition.value))
        }
        ConditionOperator::GreaterThan => {
            field_value.is_some_and(|actual| compare_ordered(actual, &condition.value)
                .is_some_and(|ord| ord == std::cmp::Ordering::Greater))
        }
        ConditionOperator::LessThan => {
            field_value.is_some_and(|actual| compare_ordered(actual, &condition.value)
                .is_some_and(|ord| ord == std::cmp::Ordering::Less))
        }
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    // "5" and 5 compare equal; dates compare as instants.
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (as_datetime(actual), as_datetime(expected)) {
        return a == b;
    }
    false
}

fn value_contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(haystack) => needle
            .as_str()
            .map(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
            .unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

fn value_in_list(actual: &Value, list: &Value) -> bool {
    match list {
        Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
        _ => false,
    }
}

/// Order two values as numbers if both coerce, else as datetimes.
/// Returns None on coercion failure, which makes the condition false.
fn compare_ordered(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (as_datetime(actual), as_datetime(expected)) {
        return Some(a.cmp(&b));
    }
    None
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_datetime(value: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    let text = value.as_str()?;
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Fields a condition may reference, per entity type. Checked when a
/// workflow is saved, never during evaluation.
fn known_fields(entity_kind: EntityKind) -> &'static [&'static str] {
    const COMMON: &[&str] = &[
        "status",
        "old_status",
        "new_status",
        "assigned_to",
        "created_at",
        "updated_at",
        "tags",
    ];
    match entity_kind {
        EntityKind::Case => &[
            "status", "old_status", "new_status", "assigned_to", "created_at", "updated_at",
            "tags", "case_type", "priority", "stage", "client_name", "client_email",
            "opened_at", "closed_at",
        ],
        EntityKind::Lead => &[
            "status", "old_status", "new_status", "assigned_to", "created_at", "updated_at",
            "tags", "source", "score", "email", "phone", "full_name", "campaign",
        ],
        EntityKind::Appointment => &[
            "status", "old_status", "new_status", "assigned_to", "created_at", "updated_at",
            "tags", "starts_at", "ends_at", "location", "appointment_type", "attendee_email",
        ],
        EntityKind::FormSubmission => &[
            "status", "old_status", "new_status", "assigned_to", "created_at", "updated_at",
            "tags", "form_id", "form_name", "submitted_at", "email", "phone",
        ],
        EntityKind::Document => &[
            "status", "old_status", "new_status", "assigned_to", "created_at", "updated_at",
            "tags", "document_type", "file_name", "uploaded_by", "size_bytes",
        ],
        EntityKind::Match => COMMON,
    }
}

/// Reject conditions naming unknown field paths. Passing `None` for
/// the entity kind skips the check (manual triggers carry no schema).
pub fn validate_conditions(
    entity_kind: Option<EntityKind>,
    conditions: &[Condition],
) -> EngineResult<()> {
    for condition in conditions {
        if condition.field.trim().is_empty() {
            return Err(EngineError::Validation(
                "condition field must not be empty".to_string(),
            ));
        }
        if let Some(kind) = entity_kind {
            if !known_fields(kind).contains(&condition.field.as_str()) {
                return Err(EngineError::Validation(format!(
                    "unknown field '{}' for entity type '{}'",
                    condition.field, kind
                )));
            }
        }
        if matches!(
            condition.operator,
            ConditionOperator::In | ConditionOperator::NotIn
        ) && !condition.value.is_array()
        {
            return Err(EngineError::Validation(format!(
                "condition on '{}' uses a list operator without a list value",
                condition.field
            )));
        }
    }
    Ok(())
}

/// Common condition sets.
pub mod presets {
    use super::*;

    /// Lead became qualified with a score worth acting on.
    pub fn qualified_lead(min_score: f64) -> Vec<Condition> {
        vec![
            Condition::equals("new_status", Value::String("qualified".to_string())),
            Condition::greater_than("score", min_score),
        ]
    }

    /// Record sat unassigned.
    pub fn unassigned() -> Vec<Condition> {
        vec![Condition::is_empty("assigned_to")]
    }

    /// High-priority case in one of the given stages.
    pub fn urgent_case(stages: &[&str]) -> Vec<Condition> {
        vec![
            Condition::equals("priority", Value::String("high".to_string())),
            Condition::in_list(
                "stage",
                stages.iter().map(|s| Value::String(s.to_string())).collect(),
            ),
        ]
    }
}
