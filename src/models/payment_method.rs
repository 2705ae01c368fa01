//! Registered payment methods.

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

/// A billing key registered with the gateway for one card.
///
/// `customer_uid` is `{business_id}_{last4}`; the gateway stores the card,
/// we only map the key to the business. At most one method per business has
/// `default_method = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    #[serde(rename = "_id")]
    pub customer_uid: String,
    pub business_id: String,
    pub default_method: bool,
    pub created_time: DateTime,
    pub updated_time: DateTime,
}

impl PaymentMethod {
    pub fn customer_uid_for(business_id: &str, last4: &str) -> String {
        format!("{business_id}_{last4}")
    }
}
