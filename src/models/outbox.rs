use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionAssigned {
    pub mission_id: Uuid,
    pub provider_id: Uuid,
    pub previous_provider: Option<Uuid>,
    pub actor_id: String,
    pub service_type: String,
    pub location: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxPayload {
    MissionAssigned(MissionAssigned),
}

/// Side effect recorded together with the state change that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub payload: OutboxPayload,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest time the dispatcher may try this event again.
    pub next_attempt_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Set once the attempt budget is spent; the event is never retried after that.
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(payload: OutboxPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            created_at: now,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            dispatched_at: None,
            dead_lettered_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderNotification {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub mission_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
