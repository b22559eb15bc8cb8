use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::auth::{authorize, Principal, Role};
use crate::error::AppError;
use crate::state::AppState;

/// Caller holding the administrative role.
pub struct AdminPrincipal(pub Principal);

/// Caller allowed to feed the booking-subsystem contract routes.
pub struct ServicePrincipal(pub Principal);

fn authorize_parts(
    parts: &Parts,
    state: &AppState,
    allowed: &[Role],
) -> Result<Principal, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    authorize(state.authenticator.as_ref(), header, allowed)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authorize_parts(parts, state, &[Role::Admin]).map(AdminPrincipal)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServicePrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authorize_parts(parts, state, &[Role::Admin, Role::Service]).map(ServicePrincipal)
    }
}
