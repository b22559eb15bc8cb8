use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::settings::require_actor;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::{AssignmentCommit, RepositoryError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAssignment {
    pub mission_id: Uuid,
    pub provider_id: Uuid,
    pub admin_user_id: String,
    /// Version of the request the caller last observed.
    pub expected_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub mission_id: Uuid,
    pub provider_id: Uuid,
    pub version: u64,
    pub message: String,
}

/// Commits a provider choice for a request.
///
/// The request update and its outbox event are written together; the provider
/// notification and the audit entry are delivered afterwards by the outbox
/// dispatcher, so their failure never undoes or fails the assignment.
pub fn assign_manually(
    state: &AppState,
    command: ManualAssignment,
) -> Result<AssignmentResult, AppError> {
    let outcome = execute(state, command);

    let label = match &outcome {
        Ok(_) => "success",
        Err(AppError::Conflict(_)) => "conflict",
        Err(AppError::NotFound(_)) => "not_found",
        Err(_) => "error",
    };
    state
        .metrics
        .assignments_total
        .with_label_values(&[label])
        .inc();

    outcome
}

fn execute(state: &AppState, command: ManualAssignment) -> Result<AssignmentResult, AppError> {
    require_actor(&command.admin_user_id)?;

    let backend = &state.backend;

    backend
        .missions
        .fetch_request(command.mission_id)?
        .ok_or_else(|| AppError::NotFound(format!("mission {} not found", command.mission_id)))?;

    let provider = backend
        .providers
        .fetch_provider(command.provider_id)?
        .ok_or_else(|| {
            AppError::NotFound(format!("provider {} not found", command.provider_id))
        })?;

    if !provider.is_eligible() {
        return Err(AppError::BadRequest(format!(
            "provider {} is not active and verified",
            provider.id
        )));
    }

    let (request, event) = backend
        .missions
        .commit_assignment(AssignmentCommit {
            mission_id: command.mission_id,
            provider_id: command.provider_id,
            expected_version: command.expected_version,
            actor_id: command.admin_user_id.clone(),
            now: Utc::now(),
        })
        .map_err(|err| match err {
            RepositoryError::VersionConflict { expected, actual } => AppError::Conflict(format!(
                "mission {} changed since version {expected} (now {actual}); reload and retry",
                command.mission_id
            )),
            other => AppError::from(other),
        })?;

    if let Err(err) = state.outbox_tx.try_send(event.id) {
        warn!(event_id = %event.id, error = %err, "outbox wake-up not sent; retry sweep will deliver");
    }

    info!(
        mission_id = %request.id,
        provider_id = %provider.id,
        actor_id = %command.admin_user_id,
        version = request.version,
        "mission assigned"
    );

    Ok(AssignmentResult {
        mission_id: request.id,
        provider_id: provider.id,
        version: request.version,
        message: format!("Mission assigned to {}", provider.name),
    })
}
