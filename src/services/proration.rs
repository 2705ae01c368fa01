//! Prorated refund computation.
//!
//! Pure date arithmetic over an injected "now" so results are deterministic
//! and testable. Amounts are whole minor currency units throughout.

use chrono::{DateTime, Days, TimeZone};

use crate::models::BillingPlan;

/// Fee retained on prorated refunds.
pub const REFUND_FEE_PERCENT: f64 = 0.20;

/// Cancellations within this many days of the charge refund in full.
pub const FULL_REFUND_WINDOW_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refund {
    /// Whole currency units to refund.
    pub amount: i64,
    /// True when the cancellation fee was waived (cancelled within 24h).
    pub fee_waived: bool,
}

/// Compute the refund for cancelling a paid cycle at `now`.
///
/// Served time is counted in whole local days: the span from the cycle
/// start at local midnight up to tomorrow's local midnight, so the day of
/// cancellation is always billed. Cancelling on the charge day refunds the
/// full amount with the fee waived; a fully served cycle refunds nothing.
pub fn compute_refund<Tz: TimeZone>(
    cycle_start: DateTime<Tz>,
    plan: BillingPlan,
    amount: i64,
    now: DateTime<Tz>,
) -> Refund {
    compute_refund_with_fee(cycle_start, plan, amount, now, REFUND_FEE_PERCENT)
}

pub fn compute_refund_with_fee<Tz: TimeZone>(
    cycle_start: DateTime<Tz>,
    plan: BillingPlan,
    amount: i64,
    now: DateTime<Tz>,
    fee_percent: f64,
) -> Refund {
    let start_midnight = cycle_start.date_naive();
    let tomorrow_midnight = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| now.date_naive());

    let days_served = (tomorrow_midnight - start_midnight).num_days();
    let plan_days = plan.cycle_days();

    if days_served <= FULL_REFUND_WINDOW_DAYS {
        return Refund {
            amount,
            fee_waived: true,
        };
    }

    let days_unserved = (plan_days - days_served).max(0);
    let value_unserved = amount as f64 * days_unserved as f64 / plan_days as f64;
    let refund = (value_unserved * (1.0 - fee_percent)).round() as i64;

    Refund {
        amount: refund.max(0),
        fee_waived: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn cancel_on_charge_day_refunds_in_full() {
        let start = at(2026, 3, 2, 0);
        let refund = compute_refund(start, BillingPlan::FourWeek, 10_000, at(2026, 3, 2, 18));
        assert_eq!(
            refund,
            Refund {
                amount: 10_000,
                fee_waived: true
            }
        );
    }

    #[test]
    fn cancel_on_day_twenty_of_twenty_eight() {
        // Day 20 served of 28: unserved 8/28 of 10000 = 2857, minus the
        // 20% fee = 2286.
        let start = at(2026, 3, 2, 0);
        let now = start + Duration::days(19) + Duration::hours(12);
        let refund = compute_refund(start, BillingPlan::FourWeek, 10_000, now);
        assert_eq!(
            refund,
            Refund {
                amount: 2_286,
                fee_waived: false
            }
        );
    }

    #[test]
    fn fully_served_cycle_refunds_nothing() {
        let start = at(2026, 3, 2, 0);
        let now = start + Duration::days(27) + Duration::hours(12);
        let refund = compute_refund(start, BillingPlan::FourWeek, 10_000, now);
        assert_eq!(refund.amount, 0);
        assert!(!refund.fee_waived);
    }

    #[test]
    fn overshoot_past_cycle_end_clamps_to_zero() {
        let start = at(2026, 3, 2, 0);
        let now = start + Duration::days(40);
        let refund = compute_refund(start, BillingPlan::FourWeek, 10_000, now);
        assert_eq!(refund.amount, 0);
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let start = at(2026, 3, 2, 0);
        let now = at(2026, 3, 10, 11);
        let a = compute_refund(start, BillingPlan::TwentySixWeek, 130_000, now);
        let b = compute_refund(start, BillingPlan::TwentySixWeek, 130_000, now);
        assert_eq!(a, b);
    }

    #[test]
    fn custom_fee_is_applied() {
        let start = at(2026, 3, 2, 0);
        let now = start + Duration::days(13) + Duration::hours(12);
        // 14 of 28 days served, half unserved: 5000 before fee.
        let refund =
            compute_refund_with_fee(start, BillingPlan::FourWeek, 10_000, now, 0.0);
        assert_eq!(refund.amount, 5_000);
    }
}
