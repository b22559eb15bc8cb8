//! Hook for automatic assignment.
//!
//! The auto-assign switch only records intent. Nothing in the service decides
//! on its own which provider gets a mission: a deployment that wants automatic
//! matching supplies an [`AutoAssignPlanner`] and calls [`run_auto_assign_tick`]
//! from its own scheduler or event handler. Commits go through the regular
//! executor, with the same version checks and outbox side effects.

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::assignment::{assign_manually, ManualAssignment};
use crate::engine::candidates::rank_available;
use crate::engine::pending::{list_pending, MissionSummary};
use crate::engine::scoring::RankedCandidate;
use crate::engine::settings::{current, AssignmentSettings};
use crate::state::AppState;

pub trait AutoAssignPlanner: Send + Sync {
    /// Picks a provider for `mission`, or `None` to leave it for an administrator.
    fn plan(
        &self,
        mission: &MissionSummary,
        candidates: &[RankedCandidate],
        settings: &AssignmentSettings,
    ) -> Option<Uuid>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAssignReport {
    pub considered: usize,
    pub assigned: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run_auto_assign_tick(
    state: &AppState,
    planner: &dyn AutoAssignPlanner,
    actor_id: &str,
) -> AutoAssignReport {
    let mut report = AutoAssignReport::default();

    let settings = current(state).await;
    if !settings.auto_assign {
        debug!("auto-assign disabled; tick skipped");
        return report;
    }

    for mission in list_pending(state) {
        report.considered += 1;

        let candidates = rank_available(state, &mission.location);
        let Some(provider_id) = planner.plan(&mission, &candidates, &settings) else {
            report.skipped += 1;
            continue;
        };

        let command = ManualAssignment {
            mission_id: mission.id,
            provider_id,
            admin_user_id: actor_id.to_string(),
            expected_version: mission.version,
        };

        match assign_manually(state, command) {
            Ok(_) => report.assigned += 1,
            Err(err) => {
                warn!(mission_id = %mission.id, provider_id = %provider_id, error = %err, "automatic assignment failed");
                report.failed += 1;
            }
        }
    }

    info!(
        considered = report.considered,
        assigned = report.assigned,
        skipped = report.skipped,
        failed = report.failed,
        "auto-assign tick finished"
    );

    report
}
