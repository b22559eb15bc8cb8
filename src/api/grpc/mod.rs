use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::auth::{authorize, Principal, Role};
use crate::engine::assignment::{assign_manually, ManualAssignment};
use crate::engine::candidates::{available_providers, CandidateQuery, CandidateView};
use crate::engine::pending::{list_pending, MissionSummary as PendingMission};
use crate::engine::settings::{self, AssignmentSettings};
use crate::engine::stats::collect_stats;
use crate::error::AppError;
use crate::models::assignment::AssignmentEvent as AssignmentRecord;
use crate::state::AppState;

pub mod pb {
    tonic::include_proto!("mission");
}

use pb::mission_assignment_server::MissionAssignment;
use pb::{
    AssignMissionRequest, AssignMissionResponse, AssignmentEvent, Candidate, GetSettingsRequest,
    GetStatsRequest, ListCandidatesRequest, ListCandidatesResponse, ListPendingMissionsRequest,
    ListPendingMissionsResponse, MissionSummary, ScoreBreakdown, SettingsResponse, StatsResponse,
    ToggleAutoAssignRequest, UpdatePriorityModeRequest, WatchAssignmentsRequest,
};

pub struct GrpcMissionService {
    state: Arc<AppState>,
}

impl GrpcMissionService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn authorize<T>(&self, request: &Request<T>) -> Result<Principal, Status> {
        let header = request
            .metadata()
            .get("authorization")
            .and_then(|value| value.to_str().ok());

        authorize(self.state.authenticator.as_ref(), header, &[Role::Admin]).map_err(Status::from)
    }
}

fn parse_id(field: &str, raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|err| Status::invalid_argument(format!("invalid {field}: {err}")))
}

fn mission_to_proto(m: &PendingMission) -> MissionSummary {
    MissionSummary {
        id: m.id.to_string(),
        service: m.service.clone(),
        location: m.location.clone(),
        priority: m.priority.clone(),
        time_waiting: m.time_waiting,
        client_email: m.client_email.clone(),
        version: m.version,
    }
}

fn candidate_to_proto(c: &CandidateView) -> Candidate {
    Candidate {
        id: c.id.to_string(),
        name: c.name.clone(),
        location: c.location.clone(),
        rating: c.rating,
        hourly_rate: c.hourly_rate,
        performance_score: c.performance_score,
        breakdown: Some(ScoreBreakdown {
            location_score: c.breakdown.location_score,
            rating_score: c.breakdown.rating_score,
            experience_score: c.breakdown.experience_score,
            acceptance_score: c.breakdown.acceptance_score,
        }),
    }
}

fn settings_to_proto(s: &AssignmentSettings) -> SettingsResponse {
    SettingsResponse {
        auto_assign: s.auto_assign,
        priority_mode: s.priority_mode.clone(),
        version: s.version,
        updated_at: s
            .updated_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default(),
    }
}

fn event_to_proto(e: &AssignmentRecord) -> AssignmentEvent {
    AssignmentEvent {
        event_id: e.event_id.to_string(),
        mission_id: e.mission_id.to_string(),
        provider_id: e.provider_id.to_string(),
        actor_id: e.actor_id.clone(),
        version: e.version,
        assigned_at: e.assigned_at.to_rfc3339(),
    }
}

#[tonic::async_trait]
impl MissionAssignment for GrpcMissionService {
    async fn get_stats(
        &self,
        request: Request<GetStatsRequest>,
    ) -> Result<Response<StatsResponse>, Status> {
        self.authorize(&request)?;
        let stats = collect_stats(&self.state);

        Ok(Response::new(StatsResponse {
            pending_missions: stats.pending_missions,
            today_assignments: stats.today_assignments,
            active_providers: stats.active_providers,
            success_rate: stats.success_rate,
        }))
    }

    async fn list_pending_missions(
        &self,
        request: Request<ListPendingMissionsRequest>,
    ) -> Result<Response<ListPendingMissionsResponse>, Status> {
        self.authorize(&request)?;
        let missions = list_pending(&self.state)
            .iter()
            .map(mission_to_proto)
            .collect();

        Ok(Response::new(ListPendingMissionsResponse { missions }))
    }

    async fn list_candidates(
        &self,
        request: Request<ListCandidatesRequest>,
    ) -> Result<Response<ListCandidatesResponse>, Status> {
        self.authorize(&request)?;
        let req = request.into_inner();

        let query = CandidateQuery {
            service_type: req.service_type,
            location: req.location,
        };
        let candidates = available_providers(&self.state, &query)
            .iter()
            .map(candidate_to_proto)
            .collect();

        Ok(Response::new(ListCandidatesResponse { candidates }))
    }

    async fn assign_mission(
        &self,
        request: Request<AssignMissionRequest>,
    ) -> Result<Response<AssignMissionResponse>, Status> {
        self.authorize(&request)?;
        let req = request.into_inner();

        let command = ManualAssignment {
            mission_id: parse_id("mission_id", &req.mission_id)?,
            provider_id: parse_id("provider_id", &req.provider_id)?,
            admin_user_id: req.admin_user_id,
            expected_version: req.expected_version,
        };
        let result = assign_manually(&self.state, command)?;

        Ok(Response::new(AssignMissionResponse {
            mission_id: result.mission_id.to_string(),
            provider_id: result.provider_id.to_string(),
            version: result.version,
            message: result.message,
        }))
    }

    async fn toggle_auto_assign(
        &self,
        request: Request<ToggleAutoAssignRequest>,
    ) -> Result<Response<SettingsResponse>, Status> {
        self.authorize(&request)?;
        let req = request.into_inner();

        let updated = settings::set_auto_assign(&self.state, req.enabled, &req.admin_user_id)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(settings_to_proto(&updated)))
    }

    async fn update_priority_mode(
        &self,
        request: Request<UpdatePriorityModeRequest>,
    ) -> Result<Response<SettingsResponse>, Status> {
        self.authorize(&request)?;
        let req = request.into_inner();

        let updated = settings::set_priority_mode(&self.state, &req.mode, &req.admin_user_id)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(settings_to_proto(&updated)))
    }

    async fn get_settings(
        &self,
        request: Request<GetSettingsRequest>,
    ) -> Result<Response<SettingsResponse>, Status> {
        self.authorize(&request)?;
        let current = settings::current(&self.state).await;

        Ok(Response::new(settings_to_proto(&current)))
    }

    type WatchAssignmentsStream =
        Pin<Box<dyn Stream<Item = Result<AssignmentEvent, Status>> + Send>>;

    async fn watch_assignments(
        &self,
        request: Request<WatchAssignmentsRequest>,
    ) -> Result<Response<Self::WatchAssignmentsStream>, Status> {
        self.authorize(&request)?;

        let rx = self.state.assignment_events_tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|result| match result {
            Ok(event) => Some(Ok(event_to_proto(&event))),
            Err(_) => None,
        });

        Ok(Response::new(Box::pin(stream)))
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        let message = err.message().to_string();
        match err {
            AppError::NotFound(_) => Status::not_found(message),
            AppError::BadRequest(_) => Status::invalid_argument(message),
            AppError::Conflict(_) => Status::aborted(message),
            AppError::Unauthorized(_) => Status::unauthenticated(message),
            AppError::Forbidden(_) => Status::permission_denied(message),
            AppError::Unavailable(_) => Status::unavailable(message),
            AppError::Internal(_) => Status::internal(message),
        }
    }
}
