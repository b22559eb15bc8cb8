use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub location_score: f64,
    pub rating_score: f64,
    pub experience_score: f64,
    pub acceptance_score: f64,
}

/// Derived per request; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub provider_id: Uuid,
    pub breakdown: ScoreBreakdown,
    pub score: f64,
}

/// Broadcast once an assignment's side effects have been delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    pub event_id: Uuid,
    pub mission_id: Uuid,
    pub provider_id: Uuid,
    pub actor_id: String,
    pub version: u64,
    pub assigned_at: DateTime<Utc>,
}
