use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::models::request::ServiceRequest;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionSummary {
    pub id: Uuid,
    pub service: String,
    pub location: String,
    pub priority: String,
    /// Minutes since the request was created.
    pub time_waiting: i64,
    pub client_email: String,
    /// Pass back as `expectedVersion` when assigning.
    pub version: u64,
}

impl MissionSummary {
    pub fn from_request(request: &ServiceRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: request.id,
            service: request.service_type.clone(),
            location: request.location.clone(),
            priority: request.urgency.label().to_string(),
            time_waiting: (now - request.created_at).num_minutes().max(0),
            client_email: request.client_email.clone(),
            version: request.version,
        }
    }
}

pub fn list_pending(state: &AppState) -> Vec<MissionSummary> {
    list_pending_at(state, Utc::now())
}

/// Oldest first, capped at the configured limit. An unreachable store yields an
/// empty board.
pub fn list_pending_at(state: &AppState, now: DateTime<Utc>) -> Vec<MissionSummary> {
    match state
        .backend
        .missions
        .pending_requests(state.limits.pending_limit)
    {
        Ok(requests) => requests
            .iter()
            .map(|request| MissionSummary::from_request(request, now))
            .collect(),
        Err(err) => {
            warn!(error = %err, "pending missions query failed; returning empty list");
            Vec::new()
        }
    }
}
