use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, error};

use super::AppState;
use crate::health::{HealthState, HealthStatus};

pub async fn root() -> &'static str {
    "Sauki payment reconciliation service"
}

/// 503 only when a hard dependency is down; degraded still serves traffic.
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let status = state.health.check_health().await;
    if status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        return Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)));
    }
    debug!(status = ?status.status, "Health check passed");
    Ok(Json(status))
}

pub async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    health(state).await
}

pub async fn liveness() -> &'static str {
    "OK"
}
