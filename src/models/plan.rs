//! Billing plan definitions.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

/// Subscription billing plan, fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingPlan {
    #[serde(rename = "4_WEEK")]
    FourWeek,
    #[serde(rename = "26_WEEK")]
    TwentySixWeek,
    #[serde(rename = "52_WEEK")]
    FiftyTwoWeek,
}

impl BillingPlan {
    pub const ALL: [BillingPlan; 3] = [
        BillingPlan::FourWeek,
        BillingPlan::TwentySixWeek,
        BillingPlan::FiftyTwoWeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPlan::FourWeek => "4_WEEK",
            BillingPlan::TwentySixWeek => "26_WEEK",
            BillingPlan::FiftyTwoWeek => "52_WEEK",
        }
    }

    pub fn parse(s: &str) -> Result<Self, BillingError> {
        match s {
            "4_WEEK" => Ok(BillingPlan::FourWeek),
            "26_WEEK" => Ok(BillingPlan::TwentySixWeek),
            "52_WEEK" => Ok(BillingPlan::FiftyTwoWeek),
            other => Err(BillingError::Validation(format!(
                "billing_plan not supported ({other}), must be one of: 4_WEEK, 26_WEEK, 52_WEEK"
            ))),
        }
    }

    /// Length of one billing cycle in weeks.
    pub fn weeks(&self) -> i64 {
        match self {
            BillingPlan::FourWeek => 4,
            BillingPlan::TwentySixWeek => 26,
            BillingPlan::FiftyTwoWeek => 52,
        }
    }

    /// Length of one billing cycle in whole days.
    pub fn cycle_days(&self) -> i64 {
        self.weeks() * 7
    }

    /// Length of one billing cycle as a duration.
    pub fn cycle_duration(&self) -> Duration {
        Duration::weeks(self.weeks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_plan() {
        for plan in BillingPlan::ALL {
            assert_eq!(BillingPlan::parse(plan.as_str()).unwrap(), plan);
        }
    }

    #[test]
    fn parse_rejects_unknown_plan() {
        assert!(matches!(
            BillingPlan::parse("2_WEEK"),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn cycle_lengths() {
        assert_eq!(BillingPlan::FourWeek.cycle_days(), 28);
        assert_eq!(BillingPlan::TwentySixWeek.cycle_days(), 182);
        assert_eq!(BillingPlan::FiftyTwoWeek.cycle_days(), 364);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&BillingPlan::FourWeek).unwrap();
        assert_eq!(json, "\"4_WEEK\"");
        let plan: BillingPlan = serde_json::from_str("\"52_WEEK\"").unwrap();
        assert_eq!(plan, BillingPlan::FiftyTwoWeek);
    }
}
