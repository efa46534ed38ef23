use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::with_request_id;
use crate::services::webhook_processor::WebhookProcessorError;

pub const SIGNATURE_HEADER: &str = "verif-hash";

/// POST /webhooks/flutterwave
///
/// 200 once the notification is classified and applied, 401 for a bad
/// `verif-hash`, 400 for an unreadable body. Store failures answer 500 so the
/// gateway delivers again.
pub async fn handle_flutterwave(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match state.webhooks.process(signature, &body).await {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Webhook processed");
            (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
        }
        Err(WebhookProcessorError::Processing(e)) => {
            error!(error = %e, "Webhook processing failed, gateway will retry");
            with_request_id(e, &headers).into_response()
        }
        Err(e) => with_request_id(AppError::from(e), &headers).into_response(),
    }
}
