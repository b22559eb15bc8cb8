use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use mission_dispatch::api::rest::router;
use mission_dispatch::auth::{Principal, Role, TokenAuthenticator};
use mission_dispatch::config::{EngineLimits, OutboxPolicy};
use mission_dispatch::engine::assignment::{assign_manually, ManualAssignment};
use mission_dispatch::engine::auto_assign::{run_auto_assign_tick, AutoAssignPlanner};
use mission_dispatch::engine::candidates::rank_available;
use mission_dispatch::engine::outbox::{
    dispatch_due, dispatch_pending, run_outbox_dispatcher, DispatchReport, SWEEP_BATCH,
};
use mission_dispatch::engine::pending::MissionSummary;
use mission_dispatch::engine::scoring::RankedCandidate;
use mission_dispatch::engine::settings::{self, AssignmentSettings};
use mission_dispatch::engine::stats::collect_stats;
use mission_dispatch::error::AppError;
use mission_dispatch::geo::LocationMatcher;
use mission_dispatch::models::audit::{AuditAction, AuditEntry};
use mission_dispatch::models::booking::{Booking, BookingStatus};
use mission_dispatch::models::outbox::{OutboxEvent, ProviderNotification};
use mission_dispatch::models::provider::{PerformanceCounters, Provider};
use mission_dispatch::models::request::{RequestStatus, ServiceRequest, Urgency};
use mission_dispatch::state::AppState;
use mission_dispatch::store::{
    AssignmentCommit, AuditLog, Backend, BookingLedger, InMemoryStore, MissionRepository,
    NotificationSink, ProviderDirectory, RepositoryError,
};

const ADMIN: &str = "admin-token";
const SERVICE: &str = "service-token";
const CLIENT: &str = "client-token";

fn authenticator() -> Arc<TokenAuthenticator> {
    let principal = |user_id: &str, role| Principal {
        user_id: user_id.to_string(),
        role,
    };

    Arc::new(TokenAuthenticator::new([
        (ADMIN.to_string(), principal("admin-1", Role::Admin)),
        (SERVICE.to_string(), principal("booking", Role::Service)),
        (CLIENT.to_string(), principal("client-1", Role::Client)),
    ]))
}

fn build(backend: Backend) -> (Arc<AppState>, mpsc::Receiver<Uuid>) {
    build_with_policy(backend, OutboxPolicy::default())
}

fn build_with_policy(
    backend: Backend,
    policy: OutboxPolicy,
) -> (Arc<AppState>, mpsc::Receiver<Uuid>) {
    let (state, rx) =
        AppState::new(backend, authenticator(), EngineLimits::default(), 1024, 1024).unwrap();
    (Arc::new(state.with_outbox_policy(policy)), rx)
}

struct Harness {
    app: axum::Router,
    state: Arc<AppState>,
    store: Arc<InMemoryStore>,
    _rx: mpsc::Receiver<Uuid>,
}

fn setup() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let (state, rx) = build(Backend::from_store(store.clone()));

    Harness {
        app: router(state.clone()),
        state,
        store,
        _rx: rx,
    }
}

fn action(token: Option<&str>, body: Value) -> Request<Body> {
    json_request("POST", "/api/mission-assignment", token, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);

    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn provider(
    name: &str,
    location: &str,
    rating: Option<f64>,
    missions: u32,
    acceptance: Option<f64>,
) -> Provider {
    Provider {
        id: Uuid::new_v4(),
        name: name.to_string(),
        location: location.to_string(),
        verified: true,
        active: true,
        rating,
        hourly_rate: 30.0,
        performance: PerformanceCounters {
            missions_completed: missions,
            acceptance_rate: acceptance,
            total_earnings: 0.0,
        },
        updated_at: Utc::now(),
    }
}

fn request_at(location: &str, urgency: Urgency, created_at: DateTime<Utc>) -> ServiceRequest {
    ServiceRequest::new(
        "plumbing".to_string(),
        location.to_string(),
        urgency,
        "client@example.com".to_string(),
        created_at,
    )
}

fn assignment(mission: &ServiceRequest, provider: &Provider, version: u64) -> ManualAssignment {
    ManualAssignment {
        mission_id: mission.id,
        provider_id: provider.id,
        admin_user_id: "admin-1".to_string(),
        expected_version: version,
    }
}

#[tokio::test]
async fn health_returns_ok_without_credentials() {
    let h = setup();
    let response = h.app.oneshot(get_request("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["requests"], 0);
    assert_eq!(body["providers"], 0);
    assert_eq!(body["outboxPending"], 0);
    assert_eq!(body["outboxDeadLettered"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let h = setup();
    let response = h.app.oneshot(get_request("/metrics", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("outbox_pending"));
}

#[tokio::test]
async fn actions_require_credentials() {
    let h = setup();
    let response = h
        .app
        .oneshot(action(None, json!({ "action": "get_stats" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn non_admin_cannot_toggle_and_nothing_is_recorded() {
    let h = setup();
    let response = h
        .app
        .oneshot(action(
            Some(CLIENT),
            json!({ "action": "toggle_auto_assign", "enabled": true, "adminUserId": "client-1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.store.entries().unwrap().is_empty());
    assert!(!settings::current(&h.state).await.auto_assign);
}

#[tokio::test]
async fn unknown_action_returns_error_result() {
    let h = setup();
    let response = h
        .app
        .oneshot(action(Some(ADMIN), json!({ "action": "launch_rocket" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("unknown action"));
}

#[tokio::test]
async fn stats_are_zero_and_stable_on_empty_store() {
    let h = setup();

    let first = body_json(
        h.app
            .clone()
            .oneshot(action(Some(ADMIN), json!({ "action": "get_stats" })))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        h.app
            .oneshot(action(Some(ADMIN), json!({ "action": "get_stats" })))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["pendingMissions"], 0);
    assert_eq!(first["data"]["todayAssignments"], 0);
    assert_eq!(first["data"]["activeProviders"], 0);
    assert_eq!(first["data"]["successRate"], 0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn paris_provider_ranks_with_score_eighty() {
    let h = setup();

    let res = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/providers",
            Some(SERVICE),
            json!({
                "name": "P1",
                "location": "Paris",
                "verified": true,
                "rating": 4.5,
                "hourly_rate": 35.0,
                "missions_completed": 30,
                "acceptance_rate": 90.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created = body_json(res).await;

    let res = h
        .app
        .oneshot(action(
            Some(ADMIN),
            json!({
                "action": "get_available_providers",
                "serviceType": "plumbing",
                "location": "Paris 15e"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    let candidates = body["data"].as_array().unwrap();
    assert_eq!(candidates.len(), 1);

    let top = &candidates[0];
    assert_eq!(top["id"], created["id"]);
    assert_eq!(top["name"], "P1");
    assert_eq!(top["hourlyRate"], 35.0);
    assert_eq!(top["performanceScore"], 80);
    assert_eq!(top["breakdown"]["locationScore"], 100.0);
    assert_eq!(top["breakdown"]["ratingScore"], 90.0);
    assert_eq!(top["breakdown"]["experienceScore"], 40.0);
    assert_eq!(top["breakdown"]["acceptanceScore"], 90.0);
}

#[tokio::test]
async fn candidate_pool_is_prefiltered_by_rating_and_capped() {
    let h = setup();

    for i in 0..15 {
        h.store
            .insert_provider(provider(&format!("lyon-{i:02}"), "Lyon", Some(5.0), 0, Some(0.0)))
            .unwrap();
    }
    let hidden = h
        .store
        .insert_provider(provider("paris-local", "Paris", Some(1.0), 20, Some(100.0)))
        .unwrap();
    let mut inactive = provider("inactive", "Paris", Some(5.0), 50, Some(100.0));
    inactive.active = false;
    h.store.insert_provider(inactive).unwrap();

    let res = h
        .app
        .oneshot(action(
            Some(ADMIN),
            json!({ "action": "get_available_providers", "serviceType": "cleaning", "location": "Paris" }),
        ))
        .await
        .unwrap();
    let body = body_json(res).await;
    let candidates = body["data"].as_array().unwrap();

    assert_eq!(candidates.len(), 10);
    assert!(candidates.iter().all(|c| c["id"] != json!(hidden.id)));
    assert!(candidates.iter().all(|c| c["name"] != "inactive"));
}

#[tokio::test]
async fn pending_missions_are_oldest_first_and_capped_at_fifty() {
    let h = setup();
    let now = Utc::now();

    for i in 0..55 {
        let urgency = match i % 3 {
            0 => Urgency::Urgent,
            1 => Urgency::Normal,
            _ => Urgency::Low,
        };
        h.store
            .insert_request(request_at("Paris", urgency, now - Duration::minutes(i * 7 % 300)))
            .unwrap();
    }

    let res = h
        .app
        .oneshot(action(Some(ADMIN), json!({ "action": "get_pending_missions" })))
        .await
        .unwrap();
    let body = body_json(res).await;
    let missions = body["data"].as_array().unwrap();

    assert_eq!(missions.len(), 50);
    let waits: Vec<i64> = missions
        .iter()
        .map(|m| m["timeWaiting"].as_i64().unwrap())
        .collect();
    assert!(waits.windows(2).all(|w| w[0] >= w[1]));
    for mission in missions {
        assert!(["Haute", "Normale", "Basse"].contains(&mission["priority"].as_str().unwrap()));
        assert_eq!(mission["clientEmail"], "client@example.com");
        assert_eq!(mission["version"], 1);
    }
}

#[tokio::test]
async fn manual_assignment_commits_and_outbox_delivers_side_effects() {
    let h = setup();
    let mission = h
        .store
        .insert_request(request_at("Paris 15e", Urgency::Urgent, Utc::now()))
        .unwrap();
    let p1 = h
        .store
        .insert_provider(provider("P1", "Paris", Some(4.5), 30, Some(90.0)))
        .unwrap();

    let res = h
        .app
        .clone()
        .oneshot(action(
            Some(ADMIN),
            json!({
                "action": "assign_mission_manually",
                "missionId": mission.id,
                "providerId": p1.id,
                "adminUserId": "admin-1",
                "expectedVersion": 1
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["version"], 2);

    let stored = h.store.fetch_request(mission.id).unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Assigned);
    assert_eq!(stored.assigned_provider, Some(p1.id));
    assert_eq!(h.store.count_undispatched().unwrap(), 1);

    let report = dispatch_pending(&h.state);
    assert_eq!(report.delivered, 1);
    assert_eq!(h.store.count_undispatched().unwrap(), 0);

    let notifications = h.store.notifications_for(p1.id);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].mission_id, mission.id);

    let audit = h.store.entries().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::ManualAssignment);
    assert_eq!(audit[0].entity_id, mission.id.to_string());
    assert_eq!(audit[0].actor_id, "admin-1");

    let stats = collect_stats(&h.state);
    assert_eq!(stats.pending_missions, 0);
    assert_eq!(stats.today_assignments, 1);
    assert_eq!(stats.active_providers, 1);
}

#[tokio::test]
async fn outbox_dispatcher_task_delivers_after_commit() {
    let store = Arc::new(InMemoryStore::new());
    let (state, rx) = build(Backend::from_store(store.clone()));
    tokio::spawn(run_outbox_dispatcher(
        state.clone(),
        rx,
        tokio::time::Duration::from_secs(60),
    ));
    let mut events = state.assignment_events_tx.subscribe();

    let mission = store
        .insert_request(request_at("Lyon", Urgency::Normal, Utc::now()))
        .unwrap();
    let p = store
        .insert_provider(provider("Lea", "Lyon", Some(4.0), 3, None))
        .unwrap();

    assign_manually(&state, assignment(&mission, &p, 1)).unwrap();

    let event = tokio::time::timeout(tokio::time::Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.mission_id, mission.id);
    assert_eq!(event.provider_id, p.id);
    assert_eq!(store.notifications_for(p.id).len(), 1);
}

#[tokio::test]
async fn assigning_unknown_mission_is_not_found_without_audit() {
    let h = setup();
    let p = h
        .store
        .insert_provider(provider("P1", "Paris", Some(4.0), 1, None))
        .unwrap();

    let res = h
        .app
        .oneshot(action(
            Some(ADMIN),
            json!({
                "action": "assign_mission_manually",
                "missionId": Uuid::new_v4(),
                "providerId": p.id,
                "adminUserId": "admin-1",
                "expectedVersion": 1
            }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body_json(res).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    dispatch_pending(&h.state);
    assert!(h.store.entries().unwrap().is_empty());
    assert_eq!(h.store.count_undispatched().unwrap(), 0);
}

#[tokio::test]
async fn assigning_unknown_or_ineligible_provider_leaves_request_untouched() {
    let h = setup();
    let mission = h
        .store
        .insert_request(request_at("Paris", Urgency::Normal, Utc::now()))
        .unwrap();
    let mut unverified = provider("Unverified", "Paris", Some(5.0), 10, None);
    unverified.verified = false;
    let unverified = h.store.insert_provider(unverified).unwrap();

    let missing = assign_manually(
        &h.state,
        ManualAssignment {
            mission_id: mission.id,
            provider_id: Uuid::new_v4(),
            admin_user_id: "admin-1".to_string(),
            expected_version: 1,
        },
    );
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    let ineligible = assign_manually(&h.state, assignment(&mission, &unverified, 1));
    assert!(matches!(ineligible, Err(AppError::BadRequest(_))));

    let stored = h.store.fetch_request(mission.id).unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::New);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn stale_version_is_rejected_with_conflict() {
    let h = setup();
    let mission = h
        .store
        .insert_request(request_at("Paris", Urgency::Normal, Utc::now()))
        .unwrap();
    let first = h
        .store
        .insert_provider(provider("First", "Paris", Some(4.0), 1, None))
        .unwrap();
    let second = h
        .store
        .insert_provider(provider("Second", "Paris", Some(4.0), 1, None))
        .unwrap();

    assign_manually(&h.state, assignment(&mission, &first, 1)).unwrap();

    let res = h
        .app
        .oneshot(action(
            Some(ADMIN),
            json!({
                "action": "assign_mission_manually",
                "missionId": mission.id,
                "providerId": second.id,
                "adminUserId": "admin-1",
                "expectedVersion": 1
            }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CONFLICT);
    let stored = h.store.fetch_request(mission.id).unwrap().unwrap();
    assert_eq!(stored.assigned_provider, Some(first.id));
    assert_eq!(h.store.count_undispatched().unwrap(), 1);
}

#[tokio::test]
async fn assignment_without_expected_version_is_a_bad_request() {
    let h = setup();
    let res = h
        .app
        .oneshot(action(
            Some(ADMIN),
            json!({
                "action": "assign_mission_manually",
                "missionId": Uuid::new_v4(),
                "providerId": Uuid::new_v4(),
                "adminUserId": "admin-1"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = body_json(res).await;
    assert_eq!(body["success"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_assignments_leave_exactly_one_provider() {
    let h = setup();
    let mission = h
        .store
        .insert_request(request_at("Paris", Urgency::Urgent, Utc::now()))
        .unwrap();
    let a = h
        .store
        .insert_provider(provider("A", "Paris", Some(4.0), 1, None))
        .unwrap();
    let b = h
        .store
        .insert_provider(provider("B", "Paris", Some(4.0), 1, None))
        .unwrap();

    let tasks: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|p| {
            let state = h.state.clone();
            let mission = mission.clone();
            tokio::spawn(async move { assign_manually(&state, assignment(&mission, &p, 1)) })
        })
        .collect();

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(result) => winners.push(result.provider_id),
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, 1);
    let stored = h.store.fetch_request(mission.id).unwrap().unwrap();
    assert_eq!(stored.assigned_provider, Some(winners[0]));
    assert!(winners[0] == a.id || winners[0] == b.id);
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn toggles_are_config_only_and_survive_replay() {
    let h = setup();
    h.store
        .insert_request(request_at("Paris", Urgency::Normal, Utc::now()))
        .unwrap();
    h.store
        .insert_provider(provider("P1", "Paris", Some(4.0), 1, None))
        .unwrap();

    let before = collect_stats(&h.state);

    let res = h
        .app
        .clone()
        .oneshot(action(
            Some(ADMIN),
            json!({ "action": "toggle_auto_assign", "enabled": true, "adminUserId": "admin-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["settings"]["autoAssign"], true);

    let res = h
        .app
        .clone()
        .oneshot(action(
            Some(ADMIN),
            json!({ "action": "update_priority_mode", "mode": "highest-rated", "adminUserId": "admin-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let after = collect_stats(&h.state);
    assert_eq!(before.pending_missions, after.pending_missions);
    assert_eq!(before.active_providers, after.active_providers);

    let res = h
        .app
        .clone()
        .oneshot(action(Some(ADMIN), json!({ "action": "get_assignment_settings" })))
        .await
        .unwrap();
    let body = body_json(res).await;
    assert_eq!(body["data"]["autoAssign"], true);
    assert_eq!(body["data"]["priorityMode"], "highest-rated");
    assert_eq!(body["data"]["version"], 2);

    let res = h
        .app
        .oneshot(action(Some(ADMIN), json!({ "action": "get_audit_log", "limit": 1 })))
        .await
        .unwrap();
    let body = body_json(res).await;
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "update_priority_mode");
    assert_eq!(entries[0]["new_value"], "highest-rated");

    let (restarted, _rx) = build(Backend::from_store(h.store.clone()));
    let replayed = settings::current(&restarted).await;
    assert!(replayed.auto_assign);
    assert_eq!(replayed.priority_mode.as_deref(), Some("highest-rated"));
    assert_eq!(replayed.version, 2);
}

#[tokio::test]
async fn success_rate_counts_completed_bookings() {
    let h = setup();

    let mut ids = Vec::new();
    for _ in 0..4 {
        let res = h
            .app
            .clone()
            .oneshot(json_request("POST", "/bookings", Some(SERVICE), json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let booking = body_json(res).await;
        assert_eq!(booking["status"], "pending");
        ids.push(booking["id"].as_str().unwrap().to_string());
    }

    for id in ids.iter().take(3) {
        let res = h
            .app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &format!("/bookings/{id}/status"),
                Some(SERVICE),
                json!({ "status": "completed" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    h.store
        .insert_booking(Booking {
            id: Uuid::new_v4(),
            request_id: None,
            provider_id: None,
            status: BookingStatus::Completed,
            created_at: Utc::now() - Duration::days(45),
            updated_at: Utc::now() - Duration::days(40),
        })
        .unwrap();

    assert_eq!(collect_stats(&h.state).success_rate, 75);
}

#[tokio::test]
async fn request_routes_enforce_assigned_provider_invariant() {
    let h = setup();

    let res = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/requests",
            Some(SERVICE),
            json!({
                "service_type": "electrician",
                "location": "Toulouse",
                "urgency": "urgent",
                "client_email": "c@example.com"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created = body_json(res).await;
    assert_eq!(created["status"], "new");
    assert!(created["assigned_provider"].is_null());
    let id = created["id"].as_str().unwrap().to_string();

    let res = h
        .app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/requests/{id}/status"),
            Some(SERVICE),
            json!({ "status": "confirmed" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = h
        .app
        .oneshot(json_request(
            "PATCH",
            &format!("/requests/{id}/status"),
            Some(SERVICE),
            json!({ "status": "unmatched" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "unmatched");
    assert_eq!(body["version"], 2);
}

#[tokio::test]
async fn client_cannot_feed_provider_directory() {
    let h = setup();
    let res = h
        .app
        .oneshot(json_request(
            "POST",
            "/providers",
            Some(CLIENT),
            json!({ "name": "Sneaky", "location": "Paris" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(h.store.list_providers().unwrap().is_empty());
}

struct FailingBookings;

impl BookingLedger for FailingBookings {
    fn insert_booking(&self, _booking: Booking) -> Result<Booking, RepositoryError> {
        Err(RepositoryError::Unavailable("bookings offline".to_string()))
    }

    fn update_booking_status(
        &self,
        _id: Uuid,
        _status: BookingStatus,
        _now: DateTime<Utc>,
    ) -> Result<Booking, RepositoryError> {
        Err(RepositoryError::Unavailable("bookings offline".to_string()))
    }

    fn count_created_since(&self, _since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Err(RepositoryError::Unavailable("bookings offline".to_string()))
    }

    fn count_completed_created_since(&self, _since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Err(RepositoryError::Unavailable("bookings offline".to_string()))
    }
}

struct FailingDirectory;

impl ProviderDirectory for FailingDirectory {
    fn insert_provider(&self, _provider: Provider) -> Result<Provider, RepositoryError> {
        Err(RepositoryError::Unavailable("directory offline".to_string()))
    }

    fn fetch_provider(&self, _id: Uuid) -> Result<Option<Provider>, RepositoryError> {
        Err(RepositoryError::Unavailable("directory offline".to_string()))
    }

    fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError> {
        Err(RepositoryError::Unavailable("directory offline".to_string()))
    }

    fn top_rated_eligible(&self, _limit: usize) -> Result<Vec<Provider>, RepositoryError> {
        Err(RepositoryError::Unavailable("directory offline".to_string()))
    }

    fn count_eligible(&self) -> Result<u64, RepositoryError> {
        Err(RepositoryError::Unavailable("directory offline".to_string()))
    }
}

#[tokio::test]
async fn failing_queries_degrade_only_their_own_metric() {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_request(request_at("Paris", Urgency::Normal, Utc::now()))
        .unwrap();
    let mut backend = Backend::from_store(store.clone());
    backend.bookings = Arc::new(FailingBookings);
    backend.providers = Arc::new(FailingDirectory);
    let (state, _rx) = build(backend);
    let app = router(state.clone());

    let res = app
        .clone()
        .oneshot(action(Some(ADMIN), json!({ "action": "get_stats" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["pendingMissions"], 1);
    assert_eq!(body["data"]["activeProviders"], 0);
    assert_eq!(body["data"]["successRate"], 0);

    let res = app
        .oneshot(action(
            Some(ADMIN),
            json!({ "action": "get_available_providers", "serviceType": "x", "location": "Paris" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert!(body["data"].as_array().unwrap().is_empty());
}

struct FlakyNotifications {
    inner: Arc<InMemoryStore>,
    failing: AtomicBool,
}

impl NotificationSink for FlakyNotifications {
    fn notify(&self, notification: ProviderNotification) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("push gateway down".to_string()));
        }
        self.inner.notify(notification)
    }
}

#[tokio::test]
async fn failed_notification_keeps_assignment_and_is_retried() {
    let store = Arc::new(InMemoryStore::new());
    let flaky = Arc::new(FlakyNotifications {
        inner: store.clone(),
        failing: AtomicBool::new(true),
    });
    let mut backend = Backend::from_store(store.clone());
    backend.notifications = flaky.clone();
    let (state, _rx) = build(backend);

    let mission = store
        .insert_request(request_at("Paris", Urgency::Normal, Utc::now()))
        .unwrap();
    let p = store
        .insert_provider(provider("P", "Paris", Some(4.0), 2, None))
        .unwrap();

    let result = assign_manually(&state, assignment(&mission, &p, 1)).unwrap();
    assert_eq!(result.version, 2);

    let report = dispatch_pending(&state);
    assert_eq!(report.failed, 1);
    assert_eq!(store.count_undispatched().unwrap(), 1);
    assert_eq!(
        store.fetch_request(mission.id).unwrap().unwrap().status,
        RequestStatus::Assigned
    );
    assert!(store.notifications_for(p.id).is_empty());

    assert_eq!(dispatch_pending(&state), DispatchReport::default());

    flaky.failing.store(false, Ordering::SeqCst);
    let report = dispatch_due(&state, Utc::now() + Duration::minutes(5));
    assert_eq!(report.delivered, 1);
    assert_eq!(store.count_undispatched().unwrap(), 0);
    assert_eq!(store.notifications_for(p.id).len(), 1);
    assert_eq!(store.entries().unwrap().len(), 1);
}

struct FirstCandidate;

impl AutoAssignPlanner for FirstCandidate {
    fn plan(
        &self,
        _mission: &MissionSummary,
        candidates: &[RankedCandidate],
        _settings: &AssignmentSettings,
    ) -> Option<Uuid> {
        candidates.first().map(|candidate| candidate.provider.id)
    }
}

#[tokio::test]
async fn auto_assign_tick_respects_the_switch() {
    let h = setup();
    let mission = h
        .store
        .insert_request(request_at("Paris 11e", Urgency::Urgent, Utc::now()))
        .unwrap();
    let local = h
        .store
        .insert_provider(provider("Local", "Paris", Some(4.0), 10, Some(80.0)))
        .unwrap();
    h.store
        .insert_provider(provider("Far", "Marseille", Some(4.0), 10, Some(80.0)))
        .unwrap();

    let idle = run_auto_assign_tick(&h.state, &FirstCandidate, "auto-assign").await;
    assert_eq!(idle.considered, 0);
    assert_eq!(
        h.store.fetch_request(mission.id).unwrap().unwrap().status,
        RequestStatus::New
    );

    settings::set_auto_assign(&h.state, true, "admin-1")
        .await
        .unwrap();

    let report = run_auto_assign_tick(&h.state, &FirstCandidate, "auto-assign").await;
    assert_eq!(report.considered, 1);
    assert_eq!(report.assigned, 1);

    let stored = h.store.fetch_request(mission.id).unwrap().unwrap();
    assert_eq!(stored.assigned_provider, Some(local.id));
}

struct EverywhereIsNear;

impl LocationMatcher for EverywhereIsNear {
    fn proximity(&self, _request_location: &str, _provider_location: &str) -> f64 {
        100.0
    }
}

#[tokio::test]
async fn location_matcher_can_be_swapped() {
    let store = Arc::new(InMemoryStore::new());
    let (state, _rx) = AppState::new(
        Backend::from_store(store.clone()),
        authenticator(),
        EngineLimits::default(),
        16,
        16,
    )
    .unwrap();
    let state = Arc::new(state.with_matcher(Arc::new(EverywhereIsNear)));

    store
        .insert_provider(provider("Remote", "Lille", Some(4.0), 0, None))
        .unwrap();

    let ranked = rank_available(&state, "Bordeaux");
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].score.breakdown.location_score, 100.0);
}

struct RejectingProvider {
    inner: Arc<InMemoryStore>,
    rejected: Uuid,
}

impl NotificationSink for RejectingProvider {
    fn notify(&self, notification: ProviderNotification) -> Result<(), RepositoryError> {
        if notification.provider_id == self.rejected {
            return Err(RepositoryError::Unavailable("device token revoked".to_string()));
        }
        self.inner.notify(notification)
    }
}

fn rejecting_backend(store: &Arc<InMemoryStore>, rejected: &Provider) -> Backend {
    let mut backend = Backend::from_store(store.clone());
    backend.notifications = Arc::new(RejectingProvider {
        inner: store.clone(),
        rejected: rejected.id,
    });
    backend
}

#[tokio::test]
async fn healthy_event_is_delivered_behind_a_full_batch_of_failures() {
    let store = Arc::new(InMemoryStore::new());
    let broken = store
        .insert_provider(provider("Broken", "Paris", Some(4.0), 1, None))
        .unwrap();
    let healthy = store
        .insert_provider(provider("Healthy", "Paris", Some(4.0), 1, None))
        .unwrap();
    let (state, _rx) = build(rejecting_backend(&store, &broken));

    for _ in 0..SWEEP_BATCH + 5 {
        let mission = store
            .insert_request(request_at("Paris", Urgency::Normal, Utc::now()))
            .unwrap();
        assign_manually(&state, assignment(&mission, &broken, 1)).unwrap();
    }
    let mission = store
        .insert_request(request_at("Paris", Urgency::Urgent, Utc::now()))
        .unwrap();
    assign_manually(&state, assignment(&mission, &healthy, 1)).unwrap();

    let now = Utc::now();
    let first = dispatch_due(&state, now);
    assert_eq!(first.delivered + first.failed, SWEEP_BATCH);

    let second = dispatch_due(&state, now);
    assert_eq!(first.delivered + second.delivered, 1);
    assert_eq!(first.failed + second.failed, SWEEP_BATCH + 5);

    let notifications = store.notifications_for(healthy.id);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].mission_id, mission.id);
    assert_eq!(store.count_undispatched().unwrap(), (SWEEP_BATCH + 5) as u64);

    assert_eq!(dispatch_due(&state, now), DispatchReport::default());
}

#[tokio::test]
async fn exhausted_event_is_dead_lettered_and_counted() {
    let store = Arc::new(InMemoryStore::new());
    let broken = store
        .insert_provider(provider("Broken", "Paris", Some(4.0), 1, None))
        .unwrap();
    let policy = OutboxPolicy {
        max_attempts: 3,
        backoff_base_ms: 1_000,
        backoff_max_ms: 60_000,
    };
    let (state, _rx) = build_with_policy(rejecting_backend(&store, &broken), policy);

    let mission = store
        .insert_request(request_at("Paris", Urgency::Normal, Utc::now()))
        .unwrap();
    assign_manually(&state, assignment(&mission, &broken, 1)).unwrap();

    let start = Utc::now();
    let reports: Vec<DispatchReport> = (0..4)
        .map(|hour| dispatch_due(&state, start + Duration::hours(hour)))
        .collect();

    assert_eq!(reports[0].failed, 1);
    assert_eq!(reports[0].dead_lettered, 0);
    assert_eq!(reports[1].dead_lettered, 0);
    assert_eq!(reports[2].dead_lettered, 1);
    assert_eq!(reports[3], DispatchReport::default());

    assert_eq!(store.count_undispatched().unwrap(), 0);
    assert_eq!(store.count_dead_lettered().unwrap(), 1);
    assert_eq!(
        store.fetch_request(mission.id).unwrap().unwrap().status,
        RequestStatus::Assigned
    );
    assert!(state
        .metrics
        .encode()
        .unwrap()
        .contains("outbox_dead_lettered_total 1"));

    let res = router(state.clone())
        .oneshot(get_request("/health", None))
        .await
        .unwrap();
    let body = body_json(res).await;
    assert_eq!(body["outboxPending"], 0);
    assert_eq!(body["outboxDeadLettered"], 1);
}

struct FlakyAudit {
    inner: Arc<InMemoryStore>,
    failing: AtomicBool,
}

impl AuditLog for FlakyAudit {
    fn append(&self, entry: AuditEntry) -> Result<AuditEntry, RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("audit store down".to_string()));
        }
        self.inner.append(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, RepositoryError> {
        self.inner.entries()
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, RepositoryError> {
        self.inner.recent(limit)
    }
}

#[tokio::test]
async fn failed_audit_append_keeps_assignment_and_does_not_renotify() {
    let store = Arc::new(InMemoryStore::new());
    let audit = Arc::new(FlakyAudit {
        inner: store.clone(),
        failing: AtomicBool::new(true),
    });
    let mut backend = Backend::from_store(store.clone());
    backend.audit = audit.clone();
    let (state, _rx) = build(backend);

    let mission = store
        .insert_request(request_at("Lyon", Urgency::Normal, Utc::now()))
        .unwrap();
    let p = store
        .insert_provider(provider("P", "Lyon", Some(4.0), 2, None))
        .unwrap();

    assign_manually(&state, assignment(&mission, &p, 1)).unwrap();

    let report = dispatch_pending(&state);
    assert_eq!(report.failed, 1);
    assert_eq!(store.count_undispatched().unwrap(), 1);
    assert_eq!(store.notifications_for(p.id).len(), 1);
    assert!(store.entries().unwrap().is_empty());
    assert_eq!(
        store.fetch_request(mission.id).unwrap().unwrap().assigned_provider,
        Some(p.id)
    );

    audit.failing.store(false, Ordering::SeqCst);
    let report = dispatch_due(&state, Utc::now() + Duration::minutes(5));
    assert_eq!(report.delivered, 1);
    assert_eq!(store.count_undispatched().unwrap(), 0);
    assert_eq!(store.notifications_for(p.id).len(), 1);

    let entries = store.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::ManualAssignment);
}

struct OfflineMissions;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("missions offline".to_string()))
}

impl MissionRepository for OfflineMissions {
    fn insert_request(&self, _request: ServiceRequest) -> Result<ServiceRequest, RepositoryError> {
        offline()
    }

    fn fetch_request(&self, _id: Uuid) -> Result<Option<ServiceRequest>, RepositoryError> {
        offline()
    }

    fn transition_request(
        &self,
        _id: Uuid,
        _status: RequestStatus,
        _now: DateTime<Utc>,
    ) -> Result<ServiceRequest, RepositoryError> {
        offline()
    }

    fn pending_requests(&self, _limit: usize) -> Result<Vec<ServiceRequest>, RepositoryError> {
        offline()
    }

    fn count_pending(&self) -> Result<u64, RepositoryError> {
        offline()
    }

    fn count_assigned_since(&self, _since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        offline()
    }

    fn count_requests(&self) -> Result<u64, RepositoryError> {
        offline()
    }

    fn commit_assignment(
        &self,
        _commit: AssignmentCommit,
    ) -> Result<(ServiceRequest, OutboxEvent), RepositoryError> {
        offline()
    }

    fn due_events(
        &self,
        _now: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        offline()
    }

    fn mark_dispatched(&self, _event_id: Uuid, _at: DateTime<Utc>) -> Result<(), RepositoryError> {
        offline()
    }

    fn record_attempt_failure(
        &self,
        _event_id: Uuid,
        _error: String,
        _failed_at: DateTime<Utc>,
        _retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    fn count_undispatched(&self) -> Result<u64, RepositoryError> {
        offline()
    }

    fn count_dead_lettered(&self) -> Result<u64, RepositoryError> {
        offline()
    }
}

#[tokio::test]
async fn offline_missions_degrade_pending_list_and_request_counts_only() {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_provider(provider("P", "Paris", Some(4.0), 2, None))
        .unwrap();
    for status in [BookingStatus::Completed, BookingStatus::Cancelled] {
        let now = Utc::now();
        store
            .insert_booking(Booking {
                id: Uuid::new_v4(),
                request_id: None,
                provider_id: None,
                status,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    let mut backend = Backend::from_store(store.clone());
    backend.missions = Arc::new(OfflineMissions);
    let (state, _rx) = build(backend);
    let app = router(state.clone());

    let res = app
        .clone()
        .oneshot(action(Some(ADMIN), json!({ "action": "get_pending_missions" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!([]));

    let res = app
        .oneshot(action(Some(ADMIN), json!({ "action": "get_stats" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["pendingMissions"], 0);
    assert_eq!(body["data"]["todayAssignments"], 0);
    assert_eq!(body["data"]["activeProviders"], 1);
    assert_eq!(body["data"]["successRate"], 50);
}
