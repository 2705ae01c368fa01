//! Merchant-assigned charge identifiers.
//!
//! Every charge attempt is keyed by a `merchant_uid` of the form
//! `{business_id}_ch{sequence}`. The gateway deduplicates on this key, and
//! the sequence strictly increases per business, so the uid doubles as the
//! ordering of billing cycles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BillingError;

const SEPARATOR: &str = "_ch";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantUid(String);

impl MerchantUid {
    pub fn new(business_id: &str, sequence: u64) -> Self {
        Self(format!("{business_id}{SEPARATOR}{sequence}"))
    }

    /// Parse an incoming uid, rejecting anything that does not carry a
    /// numeric charge sequence.
    pub fn parse(raw: &str) -> Result<Self, BillingError> {
        let (business_id, seq) = raw.rsplit_once(SEPARATOR).ok_or_else(|| {
            BillingError::Validation(format!("malformed merchant_uid ({raw})"))
        })?;
        if business_id.is_empty() || seq.parse::<u64>().is_err() {
            return Err(BillingError::Validation(format!(
                "malformed merchant_uid ({raw})"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn business_id(&self) -> &str {
        // Parse validated the shape on construction.
        self.0.rsplit_once(SEPARATOR).map(|(b, _)| b).unwrap_or("")
    }

    pub fn sequence(&self) -> u64 {
        self.0
            .rsplit_once(SEPARATOR)
            .and_then(|(_, s)| s.parse().ok())
            .unwrap_or(0)
    }

    /// The uid of the next billing cycle for the same business.
    pub fn next(&self) -> MerchantUid {
        MerchantUid::new(self.business_id(), self.sequence() + 1)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MerchantUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
