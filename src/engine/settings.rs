//! Process-wide assignment switches.
//!
//! Every change is appended to the audit log, which stays the durable history.
//! [`AssignmentSettings`] is the projection of that history: folded once at
//! startup, then updated in place by each toggle so reads never rescan the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit::{AuditAction, AuditEntry};
use crate::state::AppState;

pub const SETTINGS_ENTITY: &str = "assignment_settings";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSettings {
    pub auto_assign: bool,
    /// Unset until an administrator picks a mode.
    pub priority_mode: Option<String>,
    /// Number of settings changes applied so far.
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AssignmentSettings {
    pub fn replay(entries: &[AuditEntry]) -> Self {
        let mut settings = Self::default();
        for entry in entries {
            settings.apply(entry);
        }
        settings
    }

    /// Folds one audit entry into the projection. Returns false for entries that
    /// are not settings changes or whose value cannot be read.
    pub fn apply(&mut self, entry: &AuditEntry) -> bool {
        match entry.action {
            AuditAction::ToggleAutoAssign => match entry.new_value.as_bool() {
                Some(enabled) => self.auto_assign = enabled,
                None => {
                    warn!(entry_id = %entry.id, "ignoring auto-assign entry without a boolean value");
                    return false;
                }
            },
            AuditAction::UpdatePriorityMode => match entry.new_value.as_str() {
                Some(mode) => self.priority_mode = Some(mode.to_string()),
                None => {
                    warn!(entry_id = %entry.id, "ignoring priority mode entry without a string value");
                    return false;
                }
            },
            AuditAction::ManualAssignment => return false,
        }

        self.version += 1;
        self.updated_at = Some(entry.recorded_at);
        true
    }
}

pub async fn current(state: &AppState) -> AssignmentSettings {
    state.settings.read().await.clone()
}

pub async fn set_auto_assign(
    state: &AppState,
    enabled: bool,
    actor_id: &str,
) -> Result<AssignmentSettings, AppError> {
    require_actor(actor_id)?;

    let mut settings = state.settings.write().await;
    let description = if enabled {
        "Auto-assignment enabled"
    } else {
        "Auto-assignment disabled"
    };

    let entry = AuditEntry::new(
        Uuid::new_v4(),
        actor_id,
        SETTINGS_ENTITY,
        "auto_assign",
        AuditAction::ToggleAutoAssign,
        json!(settings.auto_assign),
        json!(enabled),
        description,
        Utc::now(),
    );

    let stored = state.backend.audit.append(entry)?;
    settings.apply(&stored);

    info!(actor_id, enabled, version = settings.version, "auto-assign toggled");
    Ok(settings.clone())
}

pub async fn set_priority_mode(
    state: &AppState,
    mode: &str,
    actor_id: &str,
) -> Result<AssignmentSettings, AppError> {
    require_actor(actor_id)?;

    let mut settings = state.settings.write().await;
    let entry = AuditEntry::new(
        Uuid::new_v4(),
        actor_id,
        SETTINGS_ENTITY,
        "priority_mode",
        AuditAction::UpdatePriorityMode,
        json!(settings.priority_mode),
        json!(mode),
        format!("Priority mode set to {mode}"),
        Utc::now(),
    );

    let stored = state.backend.audit.append(entry)?;
    settings.apply(&stored);

    info!(actor_id, mode, version = settings.version, "priority mode updated");
    Ok(settings.clone())
}

pub(crate) fn require_actor(actor_id: &str) -> Result<(), AppError> {
    if actor_id.trim().is_empty() {
        return Err(AppError::BadRequest("adminUserId cannot be empty".to_string()));
    }
    Ok(())
}
