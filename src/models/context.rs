//! Opaque charge payload round-tripped through the gateway.
//!
//! Everything the reconciliation handler needs to advance schedule state is
//! attached to the charge request as `custom_data` and echoed back verbatim
//! on the webhook, so settlement never depends on a secondary lookup of our
//! own records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::BillingError;
use crate::models::{BillingPlan, MerchantUid};

/// Gateway-imposed size limit on the custom-data payload.
pub const CUSTOM_DATA_MAX_BYTES: usize = 4000;

/// Whether a charge opened a subscription or settled a scheduled cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeKind {
    Initial,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeContext {
    pub business_id: String,
    pub merchant_uid: MerchantUid,
    pub customer_uid: String,
    pub billing_plan: BillingPlan,
    pub cycle_start: NaiveDate,
    pub amount: i64,
    pub vat: i64,
    pub kind: ChargeKind,
}

impl ChargeContext {
    pub fn encode(&self) -> Result<String, BillingError> {
        let encoded = serde_json::to_string(self)
            .map_err(|e| BillingError::Validation(format!("unencodable charge context: {e}")))?;
        if encoded.len() > CUSTOM_DATA_MAX_BYTES {
            return Err(BillingError::Validation(format!(
                "charge context exceeds gateway payload limit ({} > {} bytes)",
                encoded.len(),
                CUSTOM_DATA_MAX_BYTES
            )));
        }
        Ok(encoded)
    }

    pub fn decode(raw: &str) -> Result<Self, BillingError> {
        serde_json::from_str(raw)
            .map_err(|e| BillingError::Validation(format!("undecodable charge context: {e}")))
    }
}
