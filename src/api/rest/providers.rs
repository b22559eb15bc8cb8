use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::extract::ServicePrincipal;
use crate::error::AppError;
use crate::models::provider::{PerformanceCounters, Provider};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/providers", post(create_provider).get(list_providers))
}

#[derive(Deserialize)]
pub struct CreateProviderPayload {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub hourly_rate: f64,
    #[serde(default)]
    pub missions_completed: u32,
    #[serde(default)]
    pub acceptance_rate: Option<f64>,
    #[serde(default)]
    pub total_earnings: f64,
}

fn default_active() -> bool {
    true
}

async fn create_provider(
    State(state): State<Arc<AppState>>,
    _caller: ServicePrincipal,
    Json(payload): Json<CreateProviderPayload>,
) -> Result<Json<Provider>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    if payload.hourly_rate < 0.0 {
        return Err(AppError::BadRequest("hourly_rate must be >= 0".to_string()));
    }

    let provider = Provider {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        location: payload.location.trim().to_string(),
        verified: payload.verified,
        active: payload.active,
        rating: payload.rating.map(|rating| rating.clamp(0.0, 5.0)),
        hourly_rate: payload.hourly_rate,
        performance: PerformanceCounters {
            missions_completed: payload.missions_completed,
            acceptance_rate: payload.acceptance_rate.map(|rate| rate.clamp(0.0, 100.0)),
            total_earnings: payload.total_earnings,
        },
        updated_at: Utc::now(),
    };

    let provider = state.backend.providers.insert_provider(provider)?;
    Ok(Json(provider))
}

async fn list_providers(
    State(state): State<Arc<AppState>>,
    _caller: ServicePrincipal,
) -> Result<Json<Vec<Provider>>, AppError> {
    Ok(Json(state.backend.providers.list_providers()?))
}
