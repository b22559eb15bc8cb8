//! Single request/response boundary of the engine.
//!
//! Every call is a JSON object carrying an `action` discriminator next to the
//! action's fields. Results come back as `{success: true, data}` or
//! `{success: false, error}`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::rest::extract::AdminPrincipal;
use crate::engine::assignment::{assign_manually, ManualAssignment};
use crate::engine::candidates::{available_providers, CandidateQuery};
use crate::engine::pending::list_pending;
use crate::engine::settings::{self, current};
use crate::engine::stats::collect_stats;
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 200;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/mission-assignment", post(dispatch))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetStats,
    GetPendingMissions,
    ToggleAutoAssign,
    UpdatePriorityMode,
    AssignMissionManually,
    GetAvailableProviders,
    GetAssignmentSettings,
    GetAuditLog,
}

impl Action {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "get_stats" => Some(Action::GetStats),
            "get_pending_missions" => Some(Action::GetPendingMissions),
            "toggle_auto_assign" => Some(Action::ToggleAutoAssign),
            "update_priority_mode" => Some(Action::UpdatePriorityMode),
            "assign_mission_manually" => Some(Action::AssignMissionManually),
            "get_available_providers" => Some(Action::GetAvailableProviders),
            "get_assignment_settings" => Some(Action::GetAssignmentSettings),
            "get_audit_log" => Some(Action::GetAuditLog),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GetStats => "get_stats",
            Action::GetPendingMissions => "get_pending_missions",
            Action::ToggleAutoAssign => "toggle_auto_assign",
            Action::UpdatePriorityMode => "update_priority_mode",
            Action::AssignMissionManually => "assign_mission_manually",
            Action::GetAvailableProviders => "get_available_providers",
            Action::GetAssignmentSettings => "get_assignment_settings",
            Action::GetAuditLog => "get_audit_log",
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleAutoAssignPayload {
    enabled: bool,
    admin_user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePriorityModePayload {
    mode: String,
    admin_user_id: String,
}

#[derive(Deserialize)]
struct AuditLogPayload {
    #[serde(default)]
    limit: Option<usize>,
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    AdminPrincipal(principal): AdminPrincipal,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(body) = body.map_err(|err| AppError::BadRequest(err.body_text()))?;

    let name = body
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("missing action".to_string()))?;

    let Some(action) = Action::parse(name) else {
        state
            .metrics
            .actions_total
            .with_label_values(&["unknown", "error"])
            .inc();
        return Err(AppError::BadRequest(format!("unknown action: {name}")));
    };

    debug!(action = action.as_str(), caller = %principal.user_id, "engine action");

    let start = Instant::now();
    let outcome = execute(&state, action, body).await;

    state
        .metrics
        .action_latency_seconds
        .with_label_values(&[action.as_str()])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .actions_total
        .with_label_values(&[action.as_str(), if outcome.is_ok() { "success" } else { "error" }])
        .inc();

    match outcome {
        Ok(data) => Ok(Json(json!({ "success": true, "data": data }))),
        Err(err) => {
            warn!(action = action.as_str(), error = %err, "engine action failed");
            Err(err)
        }
    }
}

pub async fn execute(state: &AppState, action: Action, body: Value) -> Result<Value, AppError> {
    let data = match action {
        Action::GetStats => to_value(collect_stats(state))?,
        Action::GetPendingMissions => to_value(list_pending(state))?,
        Action::ToggleAutoAssign => {
            let payload: ToggleAutoAssignPayload = payload(action, body)?;
            let settings =
                settings::set_auto_assign(state, payload.enabled, &payload.admin_user_id).await?;
            let message = if payload.enabled {
                "Auto-assignment enabled"
            } else {
                "Auto-assignment disabled"
            };
            json!({ "message": message, "settings": settings })
        }
        Action::UpdatePriorityMode => {
            let payload: UpdatePriorityModePayload = payload(action, body)?;
            let settings =
                settings::set_priority_mode(state, &payload.mode, &payload.admin_user_id).await?;
            json!({
                "message": format!("Priority mode set to {}", payload.mode),
                "settings": settings
            })
        }
        Action::AssignMissionManually => {
            let command: ManualAssignment = payload(action, body)?;
            to_value(assign_manually(state, command)?)?
        }
        Action::GetAvailableProviders => {
            let query: CandidateQuery = payload(action, body)?;
            to_value(available_providers(state, &query))?
        }
        Action::GetAssignmentSettings => to_value(current(state).await)?,
        Action::GetAuditLog => {
            let query: AuditLogPayload = payload(action, body)?;
            let limit = query
                .limit
                .unwrap_or(DEFAULT_AUDIT_LIMIT)
                .min(MAX_AUDIT_LIMIT);
            to_value(state.backend.audit.recent(limit)?)?
        }
    };

    Ok(data)
}

fn payload<T: DeserializeOwned>(action: Action, body: Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|err| {
        AppError::BadRequest(format!("invalid payload for {}: {err}", action.as_str()))
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|err| AppError::Internal(format!("failed to serialize response: {err}")))
}
