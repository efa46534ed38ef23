use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::database::models::{Agent, BalanceSnapshot};
use crate::error::{AppError, ValidationError};
use crate::middleware::error::with_request_id;
use crate::services::agents::AgentRegistration;
use crate::services::ledger::{PurchaseReceipt, PurchaseRequest};
use crate::services::rate_limiter::RateLimitAction;
use crate::services::security::normalize_phone;
use crate::vending::Network;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub phone: String,
    pub name: String,
    pub pin: String,
    pub account_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub phone: String,
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    pub pin: String,
    pub phone: String,
    pub plan_id: String,
    /// Network override for ported numbers
    pub network: Option<String>,
    #[serde(default)]
    pub ported: bool,
}

#[derive(Debug, Deserialize)]
pub struct RedeemBody {
    pub pin: String,
    pub amount: BigDecimal,
}

async fn limit(
    state: &AppState,
    action: RateLimitAction,
    identifier: &str,
) -> Result<(), AppError> {
    state
        .rate_limiter
        .check(action, identifier)
        .await
        .map_err(AppError::from)
}

/// POST /api/agents/register
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Agent>), AppError> {
    let phone = normalize_phone(&body.phone);
    let result = async {
        limit(&state, RateLimitAction::Registration, &phone).await?;
        state
            .agents
            .register(AgentRegistration {
                phone: body.phone,
                name: body.name,
                pin: body.pin,
                account_number: body.account_number,
            })
            .await
    }
    .await;

    result
        .map(|agent| (StatusCode::CREATED, Json(agent)))
        .map_err(|e| with_request_id(e, &headers))
}

/// POST /api/agents/login
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Result<Json<Agent>, AppError> {
    let phone = normalize_phone(&body.phone);
    let result = async {
        limit(&state, RateLimitAction::Login, &phone).await?;
        let agent = state.agents.login(&body.phone, &body.pin).await?;
        state.rate_limiter.reset(RateLimitAction::Login, &phone).await;
        Ok(agent)
    }
    .await;

    result.map(Json).map_err(|e| with_request_id(e, &headers))
}

/// POST /api/agents/{agent_id}/purchase
pub async fn purchase(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PurchaseBody>,
) -> Result<Json<PurchaseReceipt>, AppError> {
    let result = async {
        limit(&state, RateLimitAction::Purchase, &agent_id.to_string()).await?;
        let network = match body.network.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(Network::from_name(name).ok_or_else(|| {
                AppError::validation(ValidationError::InvalidPhone {
                    phone: body.phone.clone(),
                    reason: format!("unknown network '{}'", name),
                })
            })?),
        };
        state
            .ledger
            .purchase_data(PurchaseRequest {
                agent_id,
                pin: body.pin,
                phone: body.phone,
                plan_id: body.plan_id,
                network,
                ported: body.ported,
            })
            .await
            .map_err(AppError::from)
    }
    .await;

    result.map(Json).map_err(|e| with_request_id(e, &headers))
}

/// POST /api/agents/{agent_id}/cashback/redeem
pub async fn redeem_cashback(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RedeemBody>,
) -> Result<Json<BalanceSnapshot>, AppError> {
    state
        .ledger
        .redeem_cashback(agent_id, &body.pin, body.amount)
        .await
        .map(Json)
        .map_err(|e| with_request_id(AppError::from(e), &headers))
}
