use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub missions_completed: u32,
    /// Percentage in `0..=100`; unknown for providers without history.
    pub acceptance_rate: Option<f64>,
    pub total_earnings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub verified: bool,
    pub active: bool,
    pub rating: Option<f64>,
    pub hourly_rate: f64,
    pub performance: PerformanceCounters,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    /// Only active and verified providers may receive missions.
    pub fn is_eligible(&self) -> bool {
        self.active && self.verified
    }
}
