//! Gateway webhook endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::error::BillingError;
use crate::AppState;

/// Receive a payment notification from the gateway.
///
/// The signature is verified before the body is even parsed; the payment
/// record is then re-fetched from the gateway, so the body content itself
/// is never trusted. Returns 200 only after reconciliation has persisted
/// its writes, letting the gateway redeliver on our failures.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, BillingError> {
    let signature = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("missing X-Signature header on webhook");
            BillingError::Unauthorized("missing webhook signature".to_string())
        })?;

    if !state.gateway.verify_webhook_signature(&body, signature)? {
        return Err(BillingError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let notification = state.gateway.parse_notification(&body)?;
    state.reconciliation.handle(&notification).await?;
    Ok(StatusCode::OK)
}
