use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ToggleAutoAssign,
    UpdatePriorityMode,
    ManualAssignment,
}

/// Append-only record of an administrative action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// Assigned by the log on append; defines replay order.
    pub sequence: u64,
    pub actor_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub previous_value: Value,
    pub new_value: Value,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        actor_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: AuditAction,
        previous_value: Value,
        new_value: Value,
        description: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence: 0,
            actor_id: actor_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            previous_value,
            new_value,
            description: description.into(),
            recorded_at,
        }
    }
}
