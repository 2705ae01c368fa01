//! Immutable payment ledger entries.

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::models::MerchantUid;

/// Outcome snapshot carried by a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Paid,
    Refunded,
}

/// One settled charge or refund outcome. Inserted exactly once per
/// (gateway transaction, merchant_uid) pair and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// `{gateway_tx_id}:{merchant_uid}`, the upsert key for redelivered
    /// notifications.
    #[serde(rename = "_id")]
    pub id: String,
    pub gateway_tx_id: String,
    pub merchant_uid: MerchantUid,
    pub business_id: String,
    /// Negative for refunds.
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub created_time: DateTime,
}

impl PaymentTransaction {
    pub fn ledger_id(gateway_tx_id: &str, merchant_uid: &MerchantUid) -> String {
        format!("{gateway_tx_id}:{merchant_uid}")
    }
}
