//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use openapi_server::models::{
    CancelDeploymentResponse, CreateDeploymentRequest, CreateDeploymentResponse,
    DeploymentLogsResponse, DeploymentStatusResponse, ErrorResponse, HealthResponse,
    MetricsResponse, QueueStatusResponse, VersionResponse,
};
use tracing::{error, warn};

use crate::authn::session_token::SessionClaims;
use crate::errors::{ServiceError, StatusError};
use crate::server::state::ServerState;
use crate::telemetry::collect_metrics;
use crate::utils::version_info;

/// Error returned by handlers, rendered as `{"error": ...}`
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ServiceError::StatusError(StatusError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::StatusError(StatusError::InvalidState { .. })
            | ServiceError::StatusError(StatusError::AlreadyExists(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self.0 {
            ServiceError::ValidationError(msg) | ServiceError::AuthError(msg) => msg.clone(),
            ServiceError::StatusError(StatusError::NotFound(_)) => "Deployment not found".to_string(),
            ServiceError::StatusError(StatusError::InvalidState { reason, .. }) => {
                format!("Deployment cannot be cancelled: {}", reason)
            }
            other => {
                error!("Request failed: {}", other);
                other.to_string()
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Reject `/api` requests without a valid bearer token; valid claims are
/// handed to the handler as a request extension.
pub async fn require_auth(
    State(state): State<Arc<ServerState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let claims = state.verifier.verify_header(header).map_err(|e| {
        warn!("Rejected API request: {}", e);
        e
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deploy-service".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Submit a deployment
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Extension(claims): Extension<SessionClaims>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.submission.submit(request, &claims.user_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateDeploymentResponse {
            success: true,
            deployment_id: job.id,
            status: "pending".to_string(),
        }),
    ))
}

/// Deployment status handler
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentStatusResponse>, ApiError> {
    let status = state.store.get(&id).await?;
    Ok(Json(status.into()))
}

/// Deployment log transcript handler
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentLogsResponse>, ApiError> {
    let status = state.store.get(&id).await?;
    Ok(Json(DeploymentLogsResponse {
        deployment_id: status.id,
        status: status.phase.to_string(),
        logs: status.log_lines,
    }))
}

/// Cancel a deployment that has not finished
pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelDeploymentResponse>, ApiError> {
    state.store.cancel(&id).await?;
    Ok(Json(CancelDeploymentResponse {
        success: true,
        message: "Deployment cancelled".to_string(),
    }))
}

/// Queue depth and reachability
pub async fn queue_status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = match state.queue.len().await {
        Ok(queue_length) => QueueStatusResponse {
            queue_length,
            is_healthy: true,
        },
        Err(e) => {
            warn!("Queue status unavailable: {}", e);
            QueueStatusResponse {
                queue_length: 0,
                is_healthy: false,
            }
        }
    };
    Json(response)
}

/// Metrics handler
pub async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let metrics = tokio::task::spawn_blocking(collect_metrics).await;
    let queue_length = state.queue.len().await.ok();

    match metrics {
        Ok(metrics) => Json(MetricsResponse {
            cpu_usage: metrics.cpu_usage,
            memory_used: metrics.memory_used,
            memory_total: metrics.memory_total,
            memory_percent: metrics.memory_percent,
            disk_used: metrics.disk_used,
            disk_total: metrics.disk_total,
            disk_percent: metrics.disk_percent,
            uptime_secs: metrics.uptime_secs,
            hostname: metrics.hostname,
            queue_length,
        })
        .into_response(),
        Err(e) => ApiError(ServiceError::Internal(e.to_string())).into_response(),
    }
}
