//! Payment schedule records and their state machine.
//!
//! A `PaymentSchedule` is one billing cycle of a subscription. For a given
//! business at most one schedule may be in SCHEDULED, FAILED, or PAUSED at a
//! time; that record represents the next due cycle. Settled cycles (PAID,
//! CANCELLED, REFUNDED) are historical.

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::BillingError;
use crate::models::{BillingPlan, MerchantUid};

/// Lifecycle state of a billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Scheduled,
    Paid,
    Failed,
    Paused,
    Cancelled,
    Refunded,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "SCHEDULED",
            ScheduleStatus::Paid => "PAID",
            ScheduleStatus::Failed => "FAILED",
            ScheduleStatus::Paused => "PAUSED",
            ScheduleStatus::Cancelled => "CANCELLED",
            ScheduleStatus::Refunded => "REFUNDED",
        }
    }

    /// Apply an event through the transition table, rejecting transitions
    /// the table does not list.
    pub fn apply(self, event: ScheduleEvent) -> Result<ScheduleStatus, BillingError> {
        if event.allowed_sources().contains(&self) {
            Ok(event.target())
        } else {
            Err(BillingError::InvalidTransition {
                from: self.as_str(),
                event: event.as_str(),
            })
        }
    }
}

/// Events that move a schedule between states.
///
/// The table below is the single source of truth: `apply` uses it in memory
/// and the repository derives its conditional-update filters from it, so a
/// write can never move a schedule along an edge that is not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    ChargePaid,
    ChargeFailed,
    Pause,
    Resume,
    Cancel,
    RefundSettled,
}

impl ScheduleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleEvent::ChargePaid => "charge_paid",
            ScheduleEvent::ChargeFailed => "charge_failed",
            ScheduleEvent::Pause => "pause",
            ScheduleEvent::Resume => "resume",
            ScheduleEvent::Cancel => "cancel",
            ScheduleEvent::RefundSettled => "refund_settled",
        }
    }

    /// States this event may be applied from.
    pub fn allowed_sources(&self) -> &'static [ScheduleStatus] {
        match self {
            ScheduleEvent::ChargePaid => &[ScheduleStatus::Scheduled, ScheduleStatus::Failed],
            ScheduleEvent::ChargeFailed => &[ScheduleStatus::Scheduled, ScheduleStatus::Failed],
            ScheduleEvent::Pause => &[ScheduleStatus::Scheduled],
            ScheduleEvent::Resume => &[ScheduleStatus::Paused],
            ScheduleEvent::Cancel => &[ScheduleStatus::Scheduled, ScheduleStatus::Paused],
            ScheduleEvent::RefundSettled => &[ScheduleStatus::Paid],
        }
    }

    /// State this event lands in.
    pub fn target(&self) -> ScheduleStatus {
        match self {
            ScheduleEvent::ChargePaid => ScheduleStatus::Paid,
            ScheduleEvent::ChargeFailed => ScheduleStatus::Failed,
            ScheduleEvent::Pause => ScheduleStatus::Paused,
            ScheduleEvent::Resume => ScheduleStatus::Scheduled,
            ScheduleEvent::Cancel => ScheduleStatus::Cancelled,
            ScheduleEvent::RefundSettled => ScheduleStatus::Refunded,
        }
    }
}

/// One recorded charge failure. The schedule keeps these newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: String,
    pub timestamp: DateTime,
}

/// One billing cycle of a subscription.
///
/// `merchant_uid` is the document id, so uniqueness per charge attempt is
/// enforced by the collection itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSchedule {
    #[serde(rename = "_id")]
    pub merchant_uid: MerchantUid,
    pub business_id: String,
    pub billing_plan: BillingPlan,
    /// Charge amount in whole minor currency units.
    pub amount: i64,
    /// VAT portion, passed through to the gateway.
    pub vat: i64,
    /// Cycle start, normalized to local midnight.
    pub scheduled_date: DateTime,
    pub status: ScheduleStatus,
    /// Newest first.
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    pub time_scheduled: DateTime,
    pub time_processed: Option<DateTime>,
}
