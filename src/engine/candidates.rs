//! Two-stage candidate selection.
//!
//! Stage one asks the directory for the `candidate_pool_size` best eligible
//! providers by raw rating. Stage two scores only that pool and keeps the top
//! `candidate_limit`. A provider outside the stage-one pool is never scored,
//! whatever its location or experience.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::scoring::{rank_candidates, RankedCandidate};
use crate::models::assignment::ScoreBreakdown;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateQuery {
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub rating: Option<f64>,
    pub hourly_rate: f64,
    pub performance_score: u32,
    pub breakdown: ScoreBreakdown,
}

impl From<&RankedCandidate> for CandidateView {
    fn from(candidate: &RankedCandidate) -> Self {
        Self {
            id: candidate.provider.id,
            name: candidate.provider.name.clone(),
            location: candidate.provider.location.clone(),
            rating: candidate.provider.rating,
            hourly_rate: candidate.provider.hourly_rate,
            performance_score: candidate.score.score.round().clamp(0.0, 100.0) as u32,
            breakdown: candidate.score.breakdown.clone(),
        }
    }
}

/// Ranked candidates for a request location. An unreachable or empty directory
/// yields an empty list, never an error.
pub fn rank_available(state: &AppState, location: &str) -> Vec<RankedCandidate> {
    let pool = match state
        .backend
        .providers
        .top_rated_eligible(state.limits.candidate_pool_size)
    {
        Ok(pool) => pool,
        Err(err) => {
            warn!(error = %err, "provider directory unavailable; no candidates");
            return Vec::new();
        }
    };

    rank_candidates(
        state.matcher.as_ref(),
        location,
        pool,
        state.limits.candidate_limit,
    )
}

pub fn available_providers(state: &AppState, query: &CandidateQuery) -> Vec<CandidateView> {
    let ranked = rank_available(state, &query.location);

    debug!(
        service_type = %query.service_type,
        location = %query.location,
        candidates = ranked.len(),
        "ranked candidate providers"
    );

    ranked.iter().map(CandidateView::from).collect()
}
