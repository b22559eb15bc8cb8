use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::AppState;
use crate::store::RepositoryError;

/// Point-in-time dashboard figures. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub pending_missions: u64,
    pub today_assignments: u64,
    pub active_providers: u64,
    pub success_rate: u32,
}

pub fn collect_stats(state: &AppState) -> DashboardStats {
    collect_stats_at(state, Utc::now())
}

/// Each figure is queried on its own; a failed query reports zero for that
/// figure only.
pub fn collect_stats_at(state: &AppState, now: DateTime<Utc>) -> DashboardStats {
    let backend = &state.backend;

    let pending_missions = or_zero(state, "pending_missions", backend.missions.count_pending());

    let today_assignments = or_zero(
        state,
        "today_assignments",
        backend
            .missions
            .count_assigned_since(start_of_local_day(now)),
    );

    let active_providers = or_zero(state, "active_providers", backend.providers.count_eligible());

    let window_start = now - Duration::days(state.limits.success_window_days);
    let success = backend
        .bookings
        .count_created_since(window_start)
        .and_then(|total| {
            backend
                .bookings
                .count_completed_created_since(window_start)
                .map(|completed| success_rate(completed, total))
        });
    let success_rate = or_zero(state, "success_rate", success);

    DashboardStats {
        pending_missions,
        today_assignments,
        active_providers,
        success_rate,
    }
}

/// Completed share as a rounded percentage; zero when nothing was booked.
pub fn success_rate(completed: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }

    let rate = (completed as f64 / total as f64 * 100.0).round();
    rate.clamp(0.0, 100.0) as u32
}

/// Midnight of `now`'s calendar day in server-local time.
pub fn start_of_local_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let day = now.with_timezone(&Local).date_naive();

    // A DST jump can skip local midnight; fall back to the next hour.
    [0, 1]
        .into_iter()
        .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
        .find_map(|time| time.and_local_timezone(Local).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or(now)
}

fn or_zero<T: Default>(state: &AppState, metric: &str, result: Result<T, RepositoryError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(metric, error = %err, "stats query failed; reporting zero");
            state
                .metrics
                .stats_degraded_total
                .with_label_values(&[metric])
                .inc();
            T::default()
        }
    }
}
