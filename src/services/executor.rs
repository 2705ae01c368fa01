//! Payment executor.
//!
//! Turns "this cycle is due" into a charge request against the business's
//! current default payment method. Only requests: the definitive outcome
//! always arrives through the reconciliation webhook.

use chrono::NaiveDate;

use crate::error::BillingError;
use crate::models::{BillingPlan, ChargeContext, ChargeKind, MerchantUid};
use crate::services::gateway::{ChargeRequest, GatewayAck, GatewayClient};
use crate::services::repository::BillingRepository;

/// Everything needed to request one charge.
#[derive(Debug, Clone)]
pub struct ChargeOrder {
    pub business_id: String,
    pub merchant_uid: MerchantUid,
    pub billing_plan: BillingPlan,
    pub amount: i64,
    pub vat: i64,
    pub cycle_start: NaiveDate,
    pub kind: ChargeKind,
}

#[derive(Clone)]
pub struct PaymentExecutor {
    repository: BillingRepository,
    gateway: GatewayClient,
    currency: String,
}

impl PaymentExecutor {
    pub fn new(repository: BillingRepository, gateway: GatewayClient, currency: String) -> Self {
        Self {
            repository,
            gateway,
            currency,
        }
    }

    /// Resolve the default method and request the charge. The returned ack
    /// means "request accepted", never "paid".
    pub async fn request_charge(&self, order: &ChargeOrder) -> Result<GatewayAck, BillingError> {
        let method = self
            .repository
            .find_default_method(&order.business_id)
            .await?
            .ok_or_else(|| BillingError::NoDefaultMethod {
                business_id: order.business_id.clone(),
            })?;

        let context = ChargeContext {
            business_id: order.business_id.clone(),
            merchant_uid: order.merchant_uid.clone(),
            customer_uid: method.customer_uid.clone(),
            billing_plan: order.billing_plan,
            cycle_start: order.cycle_start,
            amount: order.amount,
            vat: order.vat,
            kind: order.kind,
        };

        let request = ChargeRequest {
            customer_uid: method.customer_uid,
            merchant_uid: order.merchant_uid.to_string(),
            amount: order.amount,
            vat: order.vat,
            currency: self.currency.clone(),
            name: charge_description(order),
            custom_data: context.encode()?,
        };

        tracing::info!(
            business_id = %order.business_id,
            merchant_uid = %order.merchant_uid,
            amount = order.amount,
            kind = ?order.kind,
            "requesting charge"
        );

        let ack = self.gateway.charge(&request).await?;

        tracing::info!(
            merchant_uid = %order.merchant_uid,
            tx_id = %ack.tx_id,
            status = %ack.status,
            "charge request acknowledged"
        );
        Ok(ack)
    }
}

/// Statement line for one cycle: business, date range, plan.
pub fn charge_description(order: &ChargeOrder) -> String {
    let cycle_end = order.cycle_start + chrono::Duration::days(order.billing_plan.cycle_days() - 1);
    format!(
        "Subscription {} {} - {} ({})",
        order.business_id,
        order.cycle_start.format("%-m/%-d"),
        cycle_end.format("%-m/%-d"),
        order.billing_plan.as_str()
    )
}
