//! Subscription and payment-method endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::BillingError;
use crate::models::{BillingPlan, PaymentMethod, PaymentSchedule, PaymentTransaction};
use crate::services::subscription::CancellationOutcome;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[validate(length(min = 1, max = 64))]
    pub business_id: String,
    /// One of `4_WEEK`, `26_WEEK`, `52_WEEK`.
    pub plan: String,
    /// Cycle price in whole currency units.
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub vat: i64,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub merchant_uid: String,
    pub status: String,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), BillingError> {
    payload.validate()?;
    let plan = BillingPlan::parse(&payload.plan)?;
    let ack = state
        .subscriptions
        .subscribe(&payload.business_id, plan, payload.amount, payload.vat)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubscribeResponse {
            merchant_uid: ack.merchant_uid,
            status: ack.status,
        }),
    ))
}

pub async fn pause(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<PaymentSchedule>, BillingError> {
    Ok(Json(state.subscriptions.pause(&business_id).await?))
}

pub async fn resume(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<PaymentSchedule>, BillingError> {
    Ok(Json(state.subscriptions.resume(&business_id).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<CancellationOutcome>, BillingError> {
    Ok(Json(state.subscriptions.cancel(&business_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterMethodRequest {
    #[validate(length(min = 1, max = 64))]
    pub business_id: String,
    #[validate(length(min = 12, max = 23))]
    pub card_number: String,
    /// Card expiry as `YYYY-MM`.
    #[validate(length(equal = 7))]
    pub expiry: String,
    /// Cardholder birth date or business registration number.
    #[validate(length(min = 6, max = 10))]
    pub birth: String,
    /// First two digits of the card password.
    #[validate(length(equal = 2))]
    pub pwd_2digit: String,
}

pub async fn register_method(
    State(state): State<AppState>,
    Json(payload): Json<RegisterMethodRequest>,
) -> Result<(StatusCode, Json<PaymentMethod>), BillingError> {
    payload.validate()?;
    let method = state
        .subscriptions
        .register_method(
            &payload.business_id,
            &payload.card_number,
            &payload.expiry,
            &payload.birth,
            &payload.pwd_2digit,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(method)))
}

pub async fn delete_method(
    State(state): State<AppState>,
    Path((business_id, last4)): Path<(String, String)>,
) -> Result<StatusCode, BillingError> {
    state.subscriptions.delete_method(&business_id, &last4).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_methods(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<Vec<PaymentMethod>>, BillingError> {
    Ok(Json(state.subscriptions.list_methods(&business_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetDefaultRequest {
    #[validate(length(equal = 4))]
    pub last4: String,
}

pub async fn set_default_method(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
    Json(payload): Json<SetDefaultRequest>,
) -> Result<StatusCode, BillingError> {
    payload.validate()?;
    state
        .subscriptions
        .set_default_method(&business_id, &payload.last4)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn schedule_history(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PaymentSchedule>>, BillingError> {
    Ok(Json(
        state
            .subscriptions
            .schedule_history(&business_id, query.limit.clamp(1, 100))
            .await?,
    ))
}

pub async fn transaction_history(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PaymentTransaction>>, BillingError> {
    Ok(Json(
        state
            .subscriptions
            .transaction_history(&business_id, query.limit.clamp(1, 100))
            .await?,
    ))
}
