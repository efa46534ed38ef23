use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::with_request_id;
use crate::services::VerificationOutcome;

/// GET /api/transactions/{tx_ref}/verify
///
/// Polled by the client after checkout. Each call may advance the
/// transaction; the answer is always the stored state afterwards.
pub async fn verify_transaction(
    State(state): State<AppState>,
    Path(tx_ref): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VerificationOutcome>, AppError> {
    let outcome = state
        .verifier
        .verify(tx_ref.trim())
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(outcome))
}
