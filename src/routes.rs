use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::AppError,
    ledger::{DEFAULT_LEADERBOARD_LIMIT, EntryRequest},
    state::State as AppState,
};

#[derive(Deserialize)]
pub struct CreateEntryPayload {
    pub email: String,
    /// Minor units (cents), as charged by the gateway.
    pub amount: u64,
    /// Confirmation id the caller obtained from the payment gateway.
    pub payment_intent_id: String,
    pub referred_by: Option<String>,
    pub user_id: Option<String>,
}

pub async fn create_entry_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateEntryPayload>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .ledger
        .create_entry(EntryRequest {
            email: payload.email,
            payment_confirmation_id: payload.payment_intent_id,
            amount_minor_units: payload.amount,
            referred_by_code: payload.referred_by,
            user_id: payload.user_id,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": {
                "id": created.entry.id,
                "referralCode": created.entry.referral_code,
                "referralLink": created.referral_link,
                "status": created.entry.status,
                "created": created.entry.created_at,
            }
        })),
    ))
}

#[derive(Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

pub async fn email_check_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EmailQuery>,
) -> Result<impl IntoResponse, AppError> {
    let entered = state.ledger.is_email_entered(&query.email).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "entered": entered }
    })))
}

pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.ledger.stats().await?;

    Ok(Json(json!({
        "success": true,
        "data": stats,
        "timestamp": Utc::now(),
    })))
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

pub async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    let rows = state
        .ledger
        .leaderboard(query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT))
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": rows,
    })))
}

#[derive(Deserialize)]
pub struct CodeQuery {
    pub code: String,
}

/// A miss is still a 200 so the frontend can show "invalid code" feedback
/// before the entrant commits.
pub async fn validate_referral_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CodeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let owner = state.ledger.find_by_referral_code(&query.code).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "valid": owner.is_some(),
            "owner": owner,
        }
    })))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "Sports Dugout contest API working",
        "store": state.store_backend,
        "timestamp": Utc::now(),
    }))
}
