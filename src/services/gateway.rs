//! Card-gateway client.
//!
//! Speaks the gateway's billing-key API: charge a stored card
//! (`merchant_uid` is the dedup key, the gateway guarantees at-most-one
//! successful charge per uid), request refunds, register/remove billing
//! keys, and fetch settled payments by gateway transaction id. Webhook
//! bodies are authenticated with an HMAC-SHA256 signature.
//!
//! Every call carries a bounded timeout. A timeout is surfaced as
//! `RequestTimeout` and must be treated as an unknown outcome, never as a
//! failed charge.

use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::GatewayConfig;
use crate::error::BillingError;

#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
}

/// Billing-key charge request.
#[derive(Debug, Serialize)]
pub struct ChargeRequest {
    pub customer_uid: String,
    pub merchant_uid: String,
    /// Whole minor currency units.
    pub amount: i64,
    pub vat: i64,
    pub currency: String,
    /// Human-readable statement line.
    pub name: String,
    /// Opaque context echoed back verbatim on the webhook.
    pub custom_data: String,
}

/// Refund request against an already-settled charge.
#[derive(Debug, Serialize)]
pub struct RefundRequest {
    pub merchant_uid: String,
    pub amount: i64,
    pub reason: String,
}

/// Billing-key registration request.
#[derive(Debug, Serialize)]
pub struct RegisterMethodRequest {
    pub customer_uid: String,
    pub card_number: String,
    pub expiry: String,
    pub birth: String,
    pub pwd_2digit: String,
}

/// Synchronous acknowledgment: the request was accepted, not settled.
/// The definitive outcome arrives on the webhook.
#[derive(Debug, Deserialize)]
pub struct GatewayAck {
    pub tx_id: String,
    pub merchant_uid: String,
    pub status: String,
}

/// Full payment record fetched by gateway transaction id.
#[derive(Debug, Deserialize)]
pub struct GatewayPayment {
    pub tx_id: String,
    pub merchant_uid: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub custom_data: String,
    #[serde(default)]
    pub fail_reason: Option<String>,
    pub paid_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    code: String,
    message: String,
}

/// Asynchronous payment-outcome notification pushed to our webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotification {
    pub status: NotificationStatus,
    pub tx_id: String,
    pub merchant_uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Ready,
    Paid,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Ready => "ready",
            NotificationStatus::Paid => "paid",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
            NotificationStatus::Unknown => "unknown",
        }
    }
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build gateway HTTP client");
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    /// Charge a stored card. Returns the gateway's synchronous ack only;
    /// paid/failed arrives via the webhook.
    pub async fn charge(&self, request: &ChargeRequest) -> Result<GatewayAck, BillingError> {
        let url = format!("{}/subscribe/payments/again", self.config.api_base_url);
        self.post_json(&url, request).await
    }

    /// Request a refund for a settled charge. Acknowledged synchronously,
    /// confirmed via the `cancelled` webhook.
    pub async fn refund(&self, request: &RefundRequest) -> Result<GatewayAck, BillingError> {
        let url = format!("{}/payments/cancel", self.config.api_base_url);
        self.post_json(&url, request).await
    }

    /// Register a billing key for a card.
    pub async fn register_method(
        &self,
        request: &RegisterMethodRequest,
    ) -> Result<GatewayAck, BillingError> {
        let url = format!(
            "{}/subscribe/customers/{}",
            self.config.api_base_url, request.customer_uid
        );
        self.post_json(&url, request).await
    }

    /// Remove a billing key.
    pub async fn delete_method(&self, customer_uid: &str) -> Result<(), BillingError> {
        let url = format!(
            "{}/subscribe/customers/{}",
            self.config.api_base_url, customer_uid
        );
        let response = self
            .client
            .delete(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(classify_transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(decode_error_body(&response.text().await.unwrap_or_default()))
        }
    }

    /// Fetch the full payment record for a gateway transaction id.
    pub async fn get_payment(&self, tx_id: &str) -> Result<GatewayPayment, BillingError> {
        let url = format!("{}/payments/{}", self.config.api_base_url, tx_id);
        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport_error)?;
        tracing::debug!(tx_id = %tx_id, status = %status, "gateway payment fetch");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                BillingError::Internal(anyhow::anyhow!("undecodable gateway payment: {e}"))
            })
        } else {
            Err(decode_error_body(&body))
        }
    }

    /// Verify a webhook signature: `HMAC-SHA256(request_body, webhook_secret)`.
    pub fn verify_webhook_signature(
        &self,
        body: &str,
        signature: &str,
    ) -> Result<bool, BillingError> {
        let expected = compute_signature(body, self.config.webhook_secret.expose_secret())?;
        let is_valid = expected == signature;
        if !is_valid {
            tracing::warn!("webhook signature verification failed");
        }
        Ok(is_valid)
    }

    /// Parse a webhook notification body.
    pub fn parse_notification(&self, body: &str) -> Result<WebhookNotification, BillingError> {
        serde_json::from_str(body)
            .map_err(|e| BillingError::Validation(format!("invalid webhook payload: {e}")))
    }

    async fn post_json<B: Serialize>(
        &self,
        url: &str,
        request: &B,
    ) -> Result<GatewayAck, BillingError> {
        if !self.is_configured() {
            return Err(BillingError::PaymentRequest {
                code: "gateway_not_configured".to_string(),
                message: "gateway credentials not configured".to_string(),
            });
        }

        let response = self
            .client
            .post(url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport_error)?;
        tracing::debug!(url = %url, status = %status, "gateway response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                BillingError::Internal(anyhow::anyhow!("undecodable gateway ack: {e}"))
            })
        } else {
            Err(decode_error_body(&body))
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> BillingError {
    if err.is_timeout() {
        BillingError::RequestTimeout
    } else {
        BillingError::PaymentRequest {
            code: "gateway_unreachable".to_string(),
            message: err.to_string(),
        }
    }
}

fn decode_error_body(body: &str) -> BillingError {
    let parsed: GatewayErrorBody =
        serde_json::from_str(body).unwrap_or_else(|_| GatewayErrorBody {
            code: "unknown".to_string(),
            message: body.to_string(),
        });
    BillingError::PaymentRequest {
        code: parsed.code,
        message: parsed.message,
    }
}

fn compute_signature(payload: &str, secret: &str) -> Result<String, BillingError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Internal(anyhow::anyhow!("invalid webhook secret length")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
