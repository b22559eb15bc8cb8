use crate::geo::LocationMatcher;
use crate::models::assignment::{CandidateScore, ScoreBreakdown};
use crate::models::provider::Provider;

const LOCATION_WEIGHT: f64 = 0.25;
const RATING_WEIGHT: f64 = 0.25;
const EXPERIENCE_WEIGHT: f64 = 0.25;
const ACCEPTANCE_WEIGHT: f64 = 0.25;

const DEFAULT_ACCEPTANCE_RATE: f64 = 50.0;
const EXPERIENCE_PER_MISSION: f64 = 2.0;
const EXPERIENCE_CAP: f64 = 40.0;

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub provider: Provider,
    pub score: CandidateScore,
}

pub fn compute_score(
    matcher: &dyn LocationMatcher,
    request_location: &str,
    provider: &Provider,
) -> CandidateScore {
    let breakdown = ScoreBreakdown {
        location_score: matcher
            .proximity(request_location, &provider.location)
            .clamp(0.0, 100.0),
        rating_score: rating_score(provider.rating),
        experience_score: experience_score(provider.performance.missions_completed),
        acceptance_score: acceptance_score(provider.performance.acceptance_rate),
    };

    CandidateScore {
        provider_id: provider.id,
        score: weighted_score(&breakdown),
        breakdown,
    }
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.location_score * LOCATION_WEIGHT)
        + (breakdown.rating_score * RATING_WEIGHT)
        + (breakdown.experience_score * EXPERIENCE_WEIGHT)
        + (breakdown.acceptance_score * ACCEPTANCE_WEIGHT)
}

/// Scores every provider and keeps the best `limit`, highest first. Equal
/// scores keep their input order.
pub fn rank_candidates(
    matcher: &dyn LocationMatcher,
    request_location: &str,
    providers: Vec<Provider>,
    limit: usize,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = providers
        .into_iter()
        .map(|provider| {
            let score = compute_score(matcher, request_location, &provider);
            RankedCandidate { provider, score }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.score.total_cmp(&a.score.score));
    ranked.truncate(limit);
    ranked
}

fn rating_score(rating: Option<f64>) -> f64 {
    rating.unwrap_or(0.0).clamp(0.0, 5.0) * 20.0
}

fn experience_score(missions_completed: u32) -> f64 {
    (missions_completed as f64 * EXPERIENCE_PER_MISSION).min(EXPERIENCE_CAP)
}

fn acceptance_score(acceptance_rate: Option<f64>) -> f64 {
    acceptance_rate
        .unwrap_or(DEFAULT_ACCEPTANCE_RATE)
        .clamp(0.0, 100.0)
}
