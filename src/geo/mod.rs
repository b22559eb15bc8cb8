//! Geographic proximity between a request and a provider.
//!
//! Locations are free-text addresses or zones. [`TextLocationMatcher`] compares
//! them as strings; a geocoding implementation can replace it behind
//! [`LocationMatcher`] without touching the scoring pipeline.

pub const FULL_MATCH: f64 = 100.0;
pub const PARTIAL_MATCH: f64 = 50.0;
pub const NO_MATCH: f64 = 0.0;

/// Tokens of this length or shorter are ignored for partial matches.
const MIN_TOKEN_CHARS: usize = 3;

pub trait LocationMatcher: Send + Sync {
    /// Proximity score in `0.0..=100.0`.
    fn proximity(&self, request_location: &str, provider_location: &str) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextLocationMatcher;

impl LocationMatcher for TextLocationMatcher {
    fn proximity(&self, request_location: &str, provider_location: &str) -> f64 {
        let request = request_location.trim().to_lowercase();
        let provider = provider_location.trim().to_lowercase();

        if request.is_empty() || provider.is_empty() {
            return NO_MATCH;
        }

        if request.contains(&provider) || provider.contains(&request) {
            return FULL_MATCH;
        }

        let shares_token = request
            .split_whitespace()
            .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
            .any(|token| provider.contains(token));

        if shares_token { PARTIAL_MATCH } else { NO_MATCH }
    }
}
