//! Webhook reconciliation.
//!
//! The gateway is the source of truth for charge outcomes. Every
//! notification is re-fetched from the gateway before any state changes,
//! so a forged or stale webhook body can never move money records. All
//! writes are keyed or conditional, which makes redelivered notifications
//! no-ops.

use std::sync::Arc;

use chrono::{Days, Local, Utc};
use mongodb::bson;

use crate::error::BillingError;
use crate::models::{
    ChargeContext, ChargeKind, FailureRecord, PaymentSchedule, PaymentTransaction, ScheduleStatus,
    TransactionStatus,
};
use crate::services::gateway::{GatewayClient, GatewayPayment, NotificationStatus, WebhookNotification};
use crate::services::metrics;
use crate::services::repository::{BillingRepository, SettlementStore};
use crate::services::scheduler::at_local_hour;

#[derive(Clone)]
pub struct ReconciliationHandler {
    store: Arc<dyn SettlementStore>,
    gateway: GatewayClient,
}

impl ReconciliationHandler {
    pub fn new(repository: BillingRepository, gateway: GatewayClient) -> Self {
        Self::with_store(Arc::new(repository), gateway)
    }

    pub fn with_store(store: Arc<dyn SettlementStore>, gateway: GatewayClient) -> Self {
        Self { store, gateway }
    }

    /// Apply one gateway notification. Returns Ok even for notification
    /// statuses we ignore; errors only surface for lookup or storage
    /// failures so the gateway retries delivery.
    pub async fn handle(&self, notification: &WebhookNotification) -> Result<(), BillingError> {
        metrics::record_webhook_notification(notification.status.as_str());
        tracing::info!(
            status = notification.status.as_str(),
            tx_id = %notification.tx_id,
            merchant_uid = %notification.merchant_uid,
            "gateway notification received"
        );

        match notification.status {
            NotificationStatus::Paid => self.settle_paid(&notification.tx_id).await,
            NotificationStatus::Failed => self.settle_failed(&notification.tx_id).await,
            NotificationStatus::Cancelled => self.settle_refund(&notification.tx_id).await,
            NotificationStatus::Ready | NotificationStatus::Unknown => {
                tracing::debug!(
                    status = notification.status.as_str(),
                    tx_id = %notification.tx_id,
                    "notification ignored"
                );
                Ok(())
            }
        }
    }

    async fn settle_paid(&self, tx_id: &str) -> Result<(), BillingError> {
        let payment = self.gateway.get_payment(tx_id).await?;
        let context = ChargeContext::decode(&payment.custom_data)?;
        let now = bson::DateTime::now();

        let transaction = PaymentTransaction {
            id: PaymentTransaction::ledger_id(&payment.tx_id, &context.merchant_uid),
            gateway_tx_id: payment.tx_id.clone(),
            merchant_uid: context.merchant_uid.clone(),
            business_id: context.business_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: TransactionStatus::Paid,
            created_time: now,
        };
        // A redelivery still walks the conditional updates below; they all
        // collapse to no-ops against already-settled state.
        if !self.store.upsert_transaction(&transaction).await? {
            tracing::info!(tx_id = %payment.tx_id, "payment already ledgered");
        }

        match context.kind {
            ChargeKind::Scheduled => {
                if !self.store.mark_paid(&context.merchant_uid, now).await? {
                    tracing::warn!(
                        merchant_uid = %context.merchant_uid,
                        "paid notification for a schedule not awaiting settlement"
                    );
                }
            }
            // The first charge has no pre-existing schedule row; record the
            // settled cycle so history and sequence numbers line up.
            ChargeKind::Initial => {
                let settled = PaymentSchedule {
                    merchant_uid: context.merchant_uid.clone(),
                    business_id: context.business_id.clone(),
                    billing_plan: context.billing_plan,
                    amount: context.amount,
                    vat: context.vat,
                    scheduled_date: cycle_start_instant(&context),
                    status: ScheduleStatus::Paid,
                    failures: Vec::new(),
                    time_scheduled: now,
                    time_processed: Some(now),
                };
                self.store.insert_schedule_if_absent(&settled).await?;
            }
        }

        self.schedule_next_cycle(&context, now).await?;
        tracing::info!(
            merchant_uid = %context.merchant_uid,
            business_id = %context.business_id,
            amount = payment.amount,
            "payment settled"
        );
        Ok(())
    }

    /// Queue the following cycle: same plan and amount, due one plan length
    /// after the cycle that just settled. Duplicate deliveries hit the
    /// existing row and change nothing.
    async fn schedule_next_cycle(
        &self,
        context: &ChargeContext,
        now: bson::DateTime,
    ) -> Result<(), BillingError> {
        let next_start = context
            .cycle_start
            .checked_add_days(Days::new(context.billing_plan.cycle_days() as u64))
            .ok_or_else(|| BillingError::Validation("cycle date out of range".into()))?;
        let due = at_local_hour(&Local, next_start, 0).with_timezone(&Utc);

        let next = PaymentSchedule {
            merchant_uid: context.merchant_uid.next(),
            business_id: context.business_id.clone(),
            billing_plan: context.billing_plan,
            amount: context.amount,
            vat: context.vat,
            scheduled_date: bson::DateTime::from_chrono(due),
            status: ScheduleStatus::Scheduled,
            failures: Vec::new(),
            time_scheduled: forward_stamp(now),
            time_processed: None,
        };
        if self.store.insert_schedule_if_absent(&next).await? {
            tracing::info!(
                merchant_uid = %next.merchant_uid,
                due = %next_start,
                "next billing cycle queued"
            );
        }
        Ok(())
    }

    async fn settle_failed(&self, tx_id: &str) -> Result<(), BillingError> {
        let payment = self.gateway.get_payment(tx_id).await?;
        let context = ChargeContext::decode(&payment.custom_data)?;
        let failure = FailureRecord {
            reason: failure_reason(&payment),
            timestamp: bson::DateTime::now(),
        };
        if self
            .store
            .mark_failed(&context.merchant_uid, &failure)
            .await?
        {
            tracing::warn!(
                merchant_uid = %context.merchant_uid,
                business_id = %context.business_id,
                reason = %failure.reason,
                "charge failed at the gateway"
            );
        } else {
            tracing::info!(
                merchant_uid = %context.merchant_uid,
                "failure notification for a schedule not awaiting settlement"
            );
        }
        Ok(())
    }

    /// A cancelled payment is a settled refund: ledger it as a negative
    /// entry and close out the schedule.
    async fn settle_refund(&self, tx_id: &str) -> Result<(), BillingError> {
        let payment = self.gateway.get_payment(tx_id).await?;
        let context = ChargeContext::decode(&payment.custom_data)?;
        let now = bson::DateTime::now();

        let transaction = PaymentTransaction {
            id: PaymentTransaction::ledger_id(&payment.tx_id, &context.merchant_uid),
            gateway_tx_id: payment.tx_id.clone(),
            merchant_uid: context.merchant_uid.clone(),
            business_id: context.business_id.clone(),
            amount: -payment.amount.abs(),
            currency: payment.currency.clone(),
            status: TransactionStatus::Refunded,
            created_time: now,
        };
        if !self.store.upsert_transaction(&transaction).await? {
            tracing::info!(tx_id = %payment.tx_id, "refund already ledgered");
        }

        if !self
            .store
            .mark_refunded(&context.merchant_uid, now)
            .await?
        {
            tracing::warn!(
                merchant_uid = %context.merchant_uid,
                "refund notification for a schedule that is not PAID"
            );
        }
        tracing::info!(
            merchant_uid = %context.merchant_uid,
            business_id = %context.business_id,
            amount = transaction.amount,
            "refund settled"
        );
        Ok(())
    }
}

/// Stamp for the forward row, strictly after the settled row it follows.
/// `latest_schedules` sorts on `time_scheduled` alone; both rows of an
/// initial charge are written in one settlement, so an equal stamp would
/// leave their newest-first order unspecified.
fn forward_stamp(now: bson::DateTime) -> bson::DateTime {
    bson::DateTime::from_millis(now.timestamp_millis() + 1)
}

fn cycle_start_instant(context: &ChargeContext) -> bson::DateTime {
    let start = at_local_hour(&Local, context.cycle_start, 0).with_timezone(&Utc);
    bson::DateTime::from_chrono(start)
}

fn failure_reason(payment: &GatewayPayment) -> String {
    payment
        .fail_reason
        .clone()
        .unwrap_or_else(|| "unknown gateway failure".to_string())
}
