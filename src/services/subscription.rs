//! Subscription lifecycle operations.
//!
//! Everything here is driven by API requests; the settlement loop and the
//! webhook handler own the background halves of the lifecycle.

use chrono::{Local, Utc};
use mongodb::bson;

use crate::error::BillingError;
use crate::models::{
    BillingPlan, ChargeKind, MerchantUid, PaymentMethod, PaymentSchedule, PaymentTransaction,
    ScheduleStatus,
};
use crate::services::executor::{ChargeOrder, PaymentExecutor};
use crate::services::gateway::{GatewayAck, GatewayClient, RefundRequest, RegisterMethodRequest};
use crate::services::metrics;
use crate::services::proration::{compute_refund_with_fee, Refund};
use crate::services::repository::BillingRepository;

#[derive(Clone)]
pub struct SubscriptionService {
    repository: BillingRepository,
    gateway: GatewayClient,
    executor: PaymentExecutor,
    refund_fee_percent: f64,
}

/// Outcome of a cancellation: what was cancelled and what goes back.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CancellationOutcome {
    pub cancelled_uid: MerchantUid,
    pub refunded_uid: Option<MerchantUid>,
    pub refund_amount: i64,
    pub fee_waived: bool,
}

impl SubscriptionService {
    pub fn new(
        repository: BillingRepository,
        gateway: GatewayClient,
        executor: PaymentExecutor,
        refund_fee_percent: f64,
    ) -> Self {
        Self {
            repository,
            gateway,
            executor,
            refund_fee_percent,
        }
    }

    /// Start a subscription: charge the first cycle immediately. The PAID
    /// record and the next cycle's schedule are created by reconciliation
    /// once the gateway confirms.
    pub async fn subscribe(
        &self,
        business_id: &str,
        plan: BillingPlan,
        amount: i64,
        vat: i64,
    ) -> Result<GatewayAck, BillingError> {
        if let Some(active) = self.repository.find_active_schedule(business_id).await? {
            return Err(BillingError::Validation(format!(
                "business already has an active subscription ({})",
                active.merchant_uid
            )));
        }

        let sequence = self
            .repository
            .latest_sequence(business_id)
            .await?
            .map_or(1, |seq| seq + 1);
        let order = ChargeOrder {
            business_id: business_id.to_string(),
            merchant_uid: MerchantUid::new(business_id, sequence),
            billing_plan: plan,
            amount,
            vat,
            cycle_start: Local::now().date_naive(),
            kind: ChargeKind::Initial,
        };

        let ack = self.executor.request_charge(&order).await?;
        metrics::record_charge_request("api", "requested");
        tracing::info!(
            business_id = %business_id,
            merchant_uid = %order.merchant_uid,
            plan = plan.as_str(),
            amount,
            "subscription started"
        );
        Ok(ack)
    }

    /// Pause the upcoming cycle. Only a SCHEDULED record can pause.
    pub async fn pause(&self, business_id: &str) -> Result<PaymentSchedule, BillingError> {
        let paused = self
            .repository
            .pause_active(business_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("no pausable schedule for business {business_id}"))
            })?;
        tracing::info!(
            business_id = %business_id,
            merchant_uid = %paused.merchant_uid,
            "subscription paused"
        );
        Ok(paused)
    }

    /// Resume a paused subscription. If the due date passed while paused,
    /// the cycle restarts today and is charged immediately.
    pub async fn resume(&self, business_id: &str) -> Result<PaymentSchedule, BillingError> {
        let paused = self
            .repository
            .find_paused_schedule(business_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("no paused schedule for business {business_id}"))
            })?;

        let now = Utc::now();
        let overdue = paused.scheduled_date.to_chrono() <= now;
        let new_date = overdue.then(|| bson::DateTime::from_chrono(now));
        if !self.repository.resume(&paused.merchant_uid, new_date).await? {
            // Lost a race with another resume or a cancellation.
            return Err(BillingError::NotFound(format!(
                "no paused schedule for business {business_id}"
            )));
        }
        tracing::info!(
            business_id = %business_id,
            merchant_uid = %paused.merchant_uid,
            overdue,
            "subscription resumed"
        );

        if overdue {
            let order = ChargeOrder {
                business_id: paused.business_id.clone(),
                merchant_uid: paused.merchant_uid.clone(),
                billing_plan: paused.billing_plan,
                amount: paused.amount,
                vat: paused.vat,
                cycle_start: now.with_timezone(&Local).date_naive(),
                kind: ChargeKind::Scheduled,
            };
            match self.executor.request_charge(&order).await {
                Ok(_) => metrics::record_charge_request("api", "requested"),
                // Unknown outcome: the daily sweep retries it.
                Err(BillingError::RequestTimeout) => {
                    metrics::record_charge_request("api", "timeout");
                    tracing::warn!(
                        merchant_uid = %paused.merchant_uid,
                        "resume charge timed out, left for the next sweep"
                    );
                }
                Err(error) => {
                    metrics::record_charge_request("api", "rejected");
                    return Err(error);
                }
            }
        }

        self.repository
            .find_schedule(&paused.merchant_uid)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("schedule {}", paused.merchant_uid)))
    }

    /// Cancel the subscription and refund the unused part of the current
    /// cycle. Forward billing stops immediately; the refund itself settles
    /// through the `cancelled` webhook.
    pub async fn cancel(&self, business_id: &str) -> Result<CancellationOutcome, BillingError> {
        let latest = self.repository.latest_schedules(business_id, 2).await?;
        let upcoming = latest.first().ok_or_else(|| BillingError::NothingToRefund {
            business_id: business_id.to_string(),
        })?;

        match upcoming.status {
            ScheduleStatus::Scheduled | ScheduleStatus::Paused => {}
            _ => {
                return Err(BillingError::NothingToRefund {
                    business_id: business_id.to_string(),
                })
            }
        }

        let current = latest.get(1).ok_or_else(|| BillingError::NothingToRefund {
            business_id: business_id.to_string(),
        })?;
        if current.status != ScheduleStatus::Paid {
            // Two consecutive unpaid records should never coexist.
            return Err(BillingError::DuplicateSchedule {
                business_id: business_id.to_string(),
            });
        }

        if !self.repository.cancel_forward(&upcoming.merchant_uid).await? {
            return Err(BillingError::NothingToRefund {
                business_id: business_id.to_string(),
            });
        }

        let refund = self.compute_cycle_refund(current);
        let mut outcome = CancellationOutcome {
            cancelled_uid: upcoming.merchant_uid.clone(),
            refunded_uid: None,
            refund_amount: refund.amount,
            fee_waived: refund.fee_waived,
        };

        if refund.amount > 0 {
            self.gateway
                .refund(&RefundRequest {
                    merchant_uid: current.merchant_uid.to_string(),
                    amount: refund.amount,
                    reason: "subscription cancelled".to_string(),
                })
                .await?;
            outcome.refunded_uid = Some(current.merchant_uid.clone());
        }

        tracing::info!(
            business_id = %business_id,
            cancelled = %outcome.cancelled_uid,
            refund_amount = outcome.refund_amount,
            fee_waived = outcome.fee_waived,
            "subscription cancelled"
        );
        Ok(outcome)
    }

    fn compute_cycle_refund(&self, current: &PaymentSchedule) -> Refund {
        compute_refund_with_fee(
            current.scheduled_date.to_chrono().with_timezone(&Local),
            current.billing_plan,
            current.amount,
            Local::now(),
            self.refund_fee_percent,
        )
    }

    /// Register a card with the gateway and store the billing key. The
    /// first method a business registers becomes its default.
    pub async fn register_method(
        &self,
        business_id: &str,
        card_number: &str,
        expiry: &str,
        birth: &str,
        pwd_2digit: &str,
    ) -> Result<PaymentMethod, BillingError> {
        let last4 = card_last4(card_number)?;
        let customer_uid = PaymentMethod::customer_uid_for(business_id, &last4);

        self.gateway
            .register_method(&RegisterMethodRequest {
                customer_uid: customer_uid.clone(),
                card_number: card_number.to_string(),
                expiry: expiry.to_string(),
                birth: birth.to_string(),
                pwd_2digit: pwd_2digit.to_string(),
            })
            .await?;

        self.repository.upsert_method(business_id, &customer_uid).await?;
        if self.repository.find_default_method(business_id).await?.is_none() {
            self.repository
                .set_default_method(business_id, &customer_uid)
                .await?;
        }

        tracing::info!(business_id = %business_id, customer_uid = %customer_uid, "payment method registered");
        self.repository
            .find_method(&customer_uid)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("payment method {customer_uid}")))
    }

    /// Remove a stored card, at the gateway first so a dangling billing
    /// key cannot survive a local delete.
    pub async fn delete_method(&self, business_id: &str, last4: &str) -> Result<(), BillingError> {
        let customer_uid = PaymentMethod::customer_uid_for(business_id, last4);
        self.gateway.delete_method(&customer_uid).await?;
        if !self.repository.delete_method(&customer_uid).await? {
            return Err(BillingError::NotFound(format!(
                "payment method {customer_uid}"
            )));
        }
        tracing::info!(business_id = %business_id, customer_uid = %customer_uid, "payment method deleted");
        Ok(())
    }

    pub async fn list_methods(
        &self,
        business_id: &str,
    ) -> Result<Vec<PaymentMethod>, BillingError> {
        self.repository.list_methods(business_id).await
    }

    /// Switch the default card. If the current cycle already failed, retry
    /// it right away with the new card.
    pub async fn set_default_method(
        &self,
        business_id: &str,
        last4: &str,
    ) -> Result<(), BillingError> {
        let customer_uid = PaymentMethod::customer_uid_for(business_id, last4);
        if !self
            .repository
            .set_default_method(business_id, &customer_uid)
            .await?
        {
            return Err(BillingError::NotFound(format!(
                "payment method {customer_uid}"
            )));
        }
        tracing::info!(business_id = %business_id, customer_uid = %customer_uid, "default payment method changed");

        let failed = self
            .repository
            .find_active_schedule(business_id)
            .await?
            .filter(|s| s.status == ScheduleStatus::Failed);
        if let Some(schedule) = failed {
            let order = ChargeOrder {
                business_id: schedule.business_id.clone(),
                merchant_uid: schedule.merchant_uid.clone(),
                billing_plan: schedule.billing_plan,
                amount: schedule.amount,
                vat: schedule.vat,
                cycle_start: schedule
                    .scheduled_date
                    .to_chrono()
                    .with_timezone(&Local)
                    .date_naive(),
                kind: ChargeKind::Scheduled,
            };
            match self.executor.request_charge(&order).await {
                Ok(_) => {
                    metrics::record_charge_request("api", "requested");
                    tracing::info!(
                        merchant_uid = %schedule.merchant_uid,
                        "failed cycle retried with new default method"
                    );
                }
                Err(error) => {
                    // Retry is best-effort, the new default is already set.
                    metrics::record_charge_request("api", "rejected");
                    tracing::warn!(
                        merchant_uid = %schedule.merchant_uid,
                        %error,
                        "retry with new default method failed"
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn schedule_history(
        &self,
        business_id: &str,
        limit: i64,
    ) -> Result<Vec<PaymentSchedule>, BillingError> {
        self.repository.latest_schedules(business_id, limit).await
    }

    pub async fn transaction_history(
        &self,
        business_id: &str,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, BillingError> {
        self.repository.list_transactions(business_id, limit).await
    }
}

fn card_last4(card_number: &str) -> Result<String, BillingError> {
    let digits: String = card_number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 12 {
        return Err(BillingError::Validation(
            "card number must contain at least 12 digits".to_string(),
        ));
    }
    Ok(digits[digits.len() - 4..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last4_strips_separators() {
        assert_eq!(card_last4("4242-4242-4242-4242").unwrap(), "4242");
        assert_eq!(card_last4("4111 1111 1111 1234").unwrap(), "1234");
    }

    #[test]
    fn short_card_numbers_are_rejected() {
        assert!(matches!(
            card_last4("1234-5678"),
            Err(BillingError::Validation(_))
        ));
    }
}
