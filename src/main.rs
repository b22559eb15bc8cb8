use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::Duration;
use tonic::transport::Server as TonicServer;

use mission_dispatch::api;
use mission_dispatch::api::grpc::pb::mission_assignment_server::MissionAssignmentServer;
use mission_dispatch::api::grpc::GrpcMissionService;
use mission_dispatch::auth::TokenAuthenticator;
use mission_dispatch::config;
use mission_dispatch::engine;
use mission_dispatch::error::AppError;
use mission_dispatch::observability::telemetry;
use mission_dispatch::state::AppState;
use mission_dispatch::store::Backend;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = config::Config::from_env()?;
    telemetry::init(&config)?;

    if config.api_tokens.is_empty() {
        tracing::warn!("API_TOKENS is empty; every call will be rejected as unauthorized");
    }

    let authenticator = Arc::new(TokenAuthenticator::new(config.api_tokens.clone()));
    let (app_state, outbox_rx) = AppState::new(
        Backend::in_memory(),
        authenticator,
        config.limits.clone(),
        config.outbox_queue_size,
        config.event_buffer_size,
    )?;
    let shared_state = Arc::new(app_state.with_outbox_policy(config.outbox_policy.clone()));

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::outbox::run_outbox_dispatcher(
        shared_state.clone(),
        outbox_rx,
        Duration::from_millis(config.outbox_retry_ms),
    ));

    let grpc_addr = format!("0.0.0.0:{}", config.grpc_port)
        .parse::<SocketAddr>()
        .map_err(|err| AppError::Internal(format!("invalid grpc address: {err}")))?;
    let grpc_service = GrpcMissionService::new(shared_state.clone());

    tokio::spawn(async move {
        tracing::info!(grpc_port = %grpc_addr, "grpc server started");
        if let Err(err) = TonicServer::builder()
            .add_service(MissionAssignmentServer::new(grpc_service))
            .serve(grpc_addr)
            .await
        {
            tracing::error!(error = %err, "grpc server failed");
        }
    });

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
