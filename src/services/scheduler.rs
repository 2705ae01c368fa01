//! Daily settlement scheduler.
//!
//! One persistent task sleeps until the next occurrence of the settlement
//! hour in local time, sweeps all due schedules, then recomputes its next
//! target. Local-offset arithmetic (not naive elapsed time) keeps the run
//! anchored to the local day boundary across restarts and offset changes.

use std::time::Instant;

use chrono::{DateTime, Days, Duration, Local, LocalResult, NaiveDate, TimeZone, Utc};
use futures::future::join_all;
use mongodb::bson;
use tokio_util::sync::CancellationToken;

use crate::error::BillingError;
use crate::models::{ChargeKind, FailureRecord, PaymentSchedule};
use crate::services::executor::{ChargeOrder, PaymentExecutor};
use crate::services::metrics;
use crate::services::repository::BillingRepository;

#[derive(Clone)]
pub struct SettlementScheduler {
    repository: BillingRepository,
    executor: PaymentExecutor,
    settlement_hour: u32,
}

/// Summary of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub requested: usize,
    pub rejected: usize,
    pub pending: usize,
}

impl SettlementScheduler {
    pub fn new(
        repository: BillingRepository,
        executor: PaymentExecutor,
        settlement_hour: u32,
    ) -> Self {
        Self {
            repository,
            executor,
            settlement_hour,
        }
    }

    /// Run until cancelled. Cancellation only happens at process shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let delay = next_settlement_delay(Local::now(), self.settlement_hour)
                .to_std()
                .unwrap_or_default();
            tracing::info!(
                sleep_secs = delay.as_secs(),
                hour = self.settlement_hour,
                "settlement scheduler waiting for next run"
            );

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("settlement scheduler shutting down");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(error) = self.sweep().await {
                // Background errors are logged, never fatal.
                tracing::error!(%error, "settlement sweep failed");
            }
        }
    }

    /// Charge every schedule due today or earlier. Individual failures do
    /// not block siblings; everything is awaited before the summary.
    pub async fn sweep(&self) -> Result<SweepSummary, BillingError> {
        let started = Instant::now();
        let cutoff = bson::DateTime::from_chrono(local_midnight(Local::now()));
        let due = self.repository.find_due_schedules(cutoff).await?;

        if due.is_empty() {
            tracing::info!("settlement sweep: nothing due");
            metrics::record_settlement_run("empty");
            return Ok(SweepSummary::default());
        }

        tracing::info!(due = due.len(), "settlement sweep starting");

        let outcomes = join_all(due.iter().map(|schedule| self.charge_one(schedule))).await;

        let mut summary = SweepSummary::default();
        for outcome in outcomes {
            match outcome {
                ChargeOutcome::Requested => summary.requested += 1,
                ChargeOutcome::Rejected => summary.rejected += 1,
                ChargeOutcome::Pending => summary.pending += 1,
            }
        }

        tracing::info!(
            requested = summary.requested,
            rejected = summary.rejected,
            pending = summary.pending,
            "settlement sweep finished"
        );
        metrics::record_settlement_run("completed");
        metrics::observe_sweep_duration(started.elapsed().as_secs_f64());
        Ok(summary)
    }

    async fn charge_one(&self, schedule: &PaymentSchedule) -> ChargeOutcome {
        let order = ChargeOrder {
            business_id: schedule.business_id.clone(),
            merchant_uid: schedule.merchant_uid.clone(),
            billing_plan: schedule.billing_plan,
            amount: schedule.amount,
            vat: schedule.vat,
            cycle_start: schedule.scheduled_date.to_chrono().with_timezone(&Local).date_naive(),
            kind: ChargeKind::Scheduled,
        };

        match self.executor.request_charge(&order).await {
            Ok(_) => {
                metrics::record_charge_request("scheduler", "requested");
                ChargeOutcome::Requested
            }
            // Unknown outcome: leave the schedule untouched until the
            // definitive notification arrives.
            Err(BillingError::RequestTimeout) => {
                tracing::warn!(
                    merchant_uid = %schedule.merchant_uid,
                    "charge request timed out, schedule left as-is"
                );
                metrics::record_charge_request("scheduler", "timeout");
                ChargeOutcome::Pending
            }
            Err(error) => {
                tracing::error!(
                    merchant_uid = %schedule.merchant_uid,
                    business_id = %schedule.business_id,
                    %error,
                    "charge request rejected"
                );
                metrics::record_charge_request("scheduler", "rejected");
                let failure = FailureRecord {
                    reason: error.to_string(),
                    timestamp: bson::DateTime::now(),
                };
                if let Err(db_error) = self
                    .repository
                    .mark_failed(&schedule.merchant_uid, &failure)
                    .await
                {
                    tracing::error!(
                        merchant_uid = %schedule.merchant_uid,
                        error = %db_error,
                        "failed to record charge failure"
                    );
                }
                ChargeOutcome::Rejected
            }
        }
    }
}

enum ChargeOutcome {
    Requested,
    Rejected,
    Pending,
}

/// Next occurrence of `hour:00` local time strictly after `now`.
/// The result is always in `(0, 24h]`.
pub fn next_settlement_delay<Tz: TimeZone>(now: DateTime<Tz>, hour: u32) -> Duration {
    let tz = now.timezone();
    let mut target = at_local_hour(&tz, now.date_naive(), hour);
    if target <= now {
        let tomorrow = now
            .date_naive()
            .checked_add_days(Days::new(1))
            .unwrap_or_else(|| now.date_naive());
        target = at_local_hour(&tz, tomorrow, hour);
    }
    target - now
}

/// Start of `now`'s local day as a UTC instant.
pub fn local_midnight<Tz: TimeZone>(now: DateTime<Tz>) -> DateTime<Utc> {
    at_local_hour(&now.timezone(), now.date_naive(), 0).with_timezone(&Utc)
}

/// Resolve a wall-clock hour on a date in a timezone. Ambiguous local
/// times take the earlier instant; times skipped by an offset change fall
/// forward in half-hour steps until a valid instant exists.
pub(crate) fn at_local_hour<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32) -> DateTime<Tz> {
    let mut naive = date
        .and_hms_opt(hour, 0, 0)
        .expect("wall-clock hour out of range");
    loop {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => return t,
            LocalResult::Ambiguous(earlier, _) => return earlier,
            LocalResult::None => naive += Duration::minutes(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    #[test]
    fn delay_is_positive_and_at_most_a_day_for_any_start_hour() {
        for start_hour in 0..24 {
            let now = tz()
                .with_ymd_and_hms(2026, 3, 2, start_hour, 17, 3)
                .unwrap();
            let delay = next_settlement_delay(now, 6);
            assert!(delay > Duration::zero(), "hour {start_hour}");
            assert!(delay <= Duration::hours(24), "hour {start_hour}");
        }
    }

    #[test]
    fn before_the_hour_targets_today() {
        let now = tz().with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap();
        assert_eq!(next_settlement_delay(now, 6), Duration::hours(2));
    }

    #[test]
    fn at_or_after_the_hour_targets_tomorrow() {
        let exactly = tz().with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap();
        assert_eq!(next_settlement_delay(exactly, 6), Duration::hours(24));

        let after = tz().with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap();
        assert_eq!(next_settlement_delay(after, 6), Duration::hours(7));
    }

    #[test]
    fn local_midnight_respects_the_offset() {
        let now = tz().with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let midnight = local_midnight(now);
        // 2026-03-02 00:00 +09:00 is 2026-03-01 15:00 UTC.
        assert_eq!(
            midnight,
            Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap()
        );
    }
}
