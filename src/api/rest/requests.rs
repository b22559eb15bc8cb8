use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::extract::ServicePrincipal;
use crate::error::AppError;
use crate::models::request::{RequestStatus, ServiceRequest, Urgency};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/status", patch(update_request_status))
}

#[derive(Deserialize)]
pub struct CreateRequestPayload {
    pub service_type: String,
    pub location: String,
    #[serde(default = "default_urgency")]
    pub urgency: Urgency,
    pub client_email: String,
}

fn default_urgency() -> Urgency {
    Urgency::Normal
}

#[derive(Deserialize)]
pub struct UpdateStatusPayload {
    pub status: RequestStatus,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    _caller: ServicePrincipal,
    Json(payload): Json<CreateRequestPayload>,
) -> Result<Json<ServiceRequest>, AppError> {
    if payload.service_type.trim().is_empty() {
        return Err(AppError::BadRequest("service_type cannot be empty".to_string()));
    }

    if !payload.client_email.contains('@') {
        return Err(AppError::BadRequest(
            "client_email must be an email address".to_string(),
        ));
    }

    let request = ServiceRequest::new(
        payload.service_type.trim().to_string(),
        payload.location.trim().to_string(),
        payload.urgency,
        payload.client_email.trim().to_string(),
        Utc::now(),
    );

    let request = state.backend.missions.insert_request(request)?;
    Ok(Json(request))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    _caller: ServicePrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, AppError> {
    let request = state
        .backend
        .missions
        .fetch_request(id)?
        .ok_or_else(|| AppError::NotFound(format!("request {} not found", id)))?;

    Ok(Json(request))
}

async fn update_request_status(
    State(state): State<Arc<AppState>>,
    _caller: ServicePrincipal,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusPayload>,
) -> Result<Json<ServiceRequest>, AppError> {
    let request = state
        .backend
        .missions
        .transition_request(id, payload.status, Utc::now())?;

    Ok(Json(request))
}
