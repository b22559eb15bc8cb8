pub mod actions;
pub mod bookings;
pub mod extract;
pub mod providers;
pub mod requests;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(actions::router())
        .merge(requests::router())
        .merge(providers::router())
        .merge(bookings::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    requests: u64,
    providers: u64,
    outbox_pending: u64,
    outbox_dead_lettered: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backend = &state.backend;

    Json(HealthResponse {
        status: "ok",
        requests: backend.missions.count_requests().unwrap_or(0),
        providers: backend
            .providers
            .list_providers()
            .map(|providers| providers.len() as u64)
            .unwrap_or(0),
        outbox_pending: backend.missions.count_undispatched().unwrap_or(0),
        outbox_dead_lettered: backend.missions.count_dead_lettered().unwrap_or(0),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
