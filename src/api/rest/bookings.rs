use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::extract::ServicePrincipal;
use crate::error::AppError;
use crate::models::booking::{Booking, BookingStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/:id/status", patch(update_booking_status))
}

#[derive(Deserialize)]
pub struct CreateBookingPayload {
    #[serde(default)]
    pub request_id: Option<Uuid>,
    #[serde(default)]
    pub provider_id: Option<Uuid>,
    #[serde(default = "default_status")]
    pub status: BookingStatus,
}

fn default_status() -> BookingStatus {
    BookingStatus::Pending
}

#[derive(Deserialize)]
pub struct UpdateBookingStatusPayload {
    pub status: BookingStatus,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    _caller: ServicePrincipal,
    Json(payload): Json<CreateBookingPayload>,
) -> Result<Json<Booking>, AppError> {
    let now = Utc::now();
    let booking = Booking {
        id: Uuid::new_v4(),
        request_id: payload.request_id,
        provider_id: payload.provider_id,
        status: payload.status,
        created_at: now,
        updated_at: now,
    };

    let booking = state.backend.bookings.insert_booking(booking)?;
    Ok(Json(booking))
}

async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    _caller: ServicePrincipal,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateBookingStatusPayload>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .backend
        .bookings
        .update_booking_status(id, payload.status, Utc::now())?;

    Ok(Json(booking))
}
