//! Admin overrides, guarded by the `x-admin-key` header.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use super::AppState;
use crate::database::models::{AdjustmentDirection, BalanceSnapshot, Transaction};
use crate::error::{AppError, SecurityError};
use crate::middleware::error::with_request_id;
use crate::payments::utils::secure_eq;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const ADMIN_ACTOR_HEADER: &str = "x-admin-actor";

#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    pub direction: AdjustmentDirection,
    pub amount: BigDecimal,
    pub reason: String,
}

/// Returns the acting operator's name for the audit log.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let Some(presented) = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!(target: "security", "Admin request without key");
        return Err(AppError::security(SecurityError::MissingAdminKey));
    };
    if state.admin_api_key.is_empty()
        || !secure_eq(presented.trim().as_bytes(), state.admin_api_key.as_bytes())
    {
        warn!(target: "security", "Admin request with wrong key");
        return Err(AppError::security(SecurityError::InvalidAdminKey));
    }
    Ok(headers
        .get(ADMIN_ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("admin")
        .to_string())
}

/// POST /api/admin/transactions/{tx_ref}/reset-delivery
pub async fn reset_delivery(
    State(state): State<AppState>,
    Path(tx_ref): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Transaction>, AppError> {
    let result = async {
        let actor = authorize(&state, &headers)?;
        state.admin.reset_delivery(&tx_ref, &actor).await
    }
    .await;
    result.map(Json).map_err(|e| with_request_id(e, &headers))
}

/// POST /api/admin/agents/{agent_id}/adjust
pub async fn adjust_balance(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<AdjustBody>,
) -> Result<Json<BalanceSnapshot>, AppError> {
    let result = async {
        let actor = authorize(&state, &headers)?;
        state
            .admin
            .adjust(agent_id, body.direction, body.amount, &body.reason, &actor)
            .await
    }
    .await;
    result.map(Json).map_err(|e| with_request_id(e, &headers))
}
