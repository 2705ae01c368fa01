use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use mongodb::bson;
use secrecy::Secret;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subscription_service::config::GatewayConfig;
use subscription_service::error::BillingError;
use subscription_service::models::{
    BillingPlan, ChargeContext, ChargeKind, FailureRecord, MerchantUid, PaymentSchedule,
    PaymentTransaction, ScheduleEvent, ScheduleStatus, TransactionStatus,
};
use subscription_service::services::gateway::{
    GatewayClient, NotificationStatus, WebhookNotification,
};
use subscription_service::services::{ReconciliationHandler, SettlementStore};

/// In-memory stand-in for the Mongo repository: keyed inserts refuse
/// duplicates, status flips go through the transition table, exactly as
/// the conditional updates behave.
#[derive(Default)]
struct MemoryStore {
    schedules: Mutex<HashMap<String, PaymentSchedule>>,
    transactions: Mutex<HashMap<String, PaymentTransaction>>,
}

impl MemoryStore {
    fn seed_schedule(&self, schedule: PaymentSchedule) {
        self.schedules
            .lock()
            .unwrap()
            .insert(schedule.merchant_uid.as_str().to_string(), schedule);
    }

    fn schedule(&self, uid: &str) -> PaymentSchedule {
        self.schedules.lock().unwrap()[uid].clone()
    }

    fn schedule_count(&self) -> usize {
        self.schedules.lock().unwrap().len()
    }

    fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }

    fn transaction(&self, id: &str) -> PaymentTransaction {
        self.transactions.lock().unwrap()[id].clone()
    }

    fn flip(
        &self,
        merchant_uid: &MerchantUid,
        event: ScheduleEvent,
        processed_at: Option<bson::DateTime>,
    ) -> bool {
        let mut schedules = self.schedules.lock().unwrap();
        match schedules.get_mut(merchant_uid.as_str()) {
            Some(s) if event.allowed_sources().contains(&s.status) => {
                s.status = event.target();
                if processed_at.is_some() {
                    s.time_processed = processed_at;
                }
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn upsert_transaction(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<bool, BillingError> {
        let mut transactions = self.transactions.lock().unwrap();
        if transactions.contains_key(&transaction.id) {
            return Ok(false);
        }
        transactions.insert(transaction.id.clone(), transaction.clone());
        Ok(true)
    }

    async fn insert_schedule_if_absent(
        &self,
        schedule: &PaymentSchedule,
    ) -> Result<bool, BillingError> {
        let mut schedules = self.schedules.lock().unwrap();
        if schedules.contains_key(schedule.merchant_uid.as_str()) {
            return Ok(false);
        }
        schedules.insert(schedule.merchant_uid.as_str().to_string(), schedule.clone());
        Ok(true)
    }

    async fn mark_paid(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: bson::DateTime,
    ) -> Result<bool, BillingError> {
        Ok(self.flip(merchant_uid, ScheduleEvent::ChargePaid, Some(processed_at)))
    }

    async fn mark_failed(
        &self,
        merchant_uid: &MerchantUid,
        failure: &FailureRecord,
    ) -> Result<bool, BillingError> {
        let mut schedules = self.schedules.lock().unwrap();
        match schedules.get_mut(merchant_uid.as_str()) {
            Some(s) if ScheduleEvent::ChargeFailed.allowed_sources().contains(&s.status) => {
                s.status = ScheduleEvent::ChargeFailed.target();
                s.failures.insert(0, failure.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_refunded(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: bson::DateTime,
    ) -> Result<bool, BillingError> {
        Ok(self.flip(merchant_uid, ScheduleEvent::RefundSettled, Some(processed_at)))
    }
}

fn gateway_for(server: &MockServer) -> GatewayClient {
    GatewayClient::new(GatewayConfig {
        key_id: "test_key".to_string(),
        key_secret: Secret::new("test_secret".to_string()),
        webhook_secret: Secret::new("whsec".to_string()),
        api_base_url: server.uri(),
        request_timeout: Duration::from_millis(500),
    })
}

fn context(business_id: &str, sequence: u64, kind: ChargeKind) -> ChargeContext {
    ChargeContext {
        business_id: business_id.to_string(),
        merchant_uid: MerchantUid::new(business_id, sequence),
        customer_uid: format!("{business_id}_4242"),
        billing_plan: BillingPlan::FourWeek,
        cycle_start: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        amount: 40_000,
        vat: 4_000,
        kind,
    }
}

async fn mount_payment(
    server: &MockServer,
    tx_id: &str,
    status: &str,
    fail_reason: Option<&str>,
    context: &ChargeContext,
) {
    Mock::given(method("GET"))
        .and(path(format!("/payments/{tx_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tx_id": tx_id,
            "merchant_uid": context.merchant_uid.as_str(),
            "amount": context.amount,
            "currency": "KRW",
            "status": status,
            "custom_data": context.encode().unwrap(),
            "fail_reason": fail_reason,
            "paid_at": null
        })))
        .mount(server)
        .await;
}

fn notification(status: NotificationStatus, tx_id: &str, merchant_uid: &str) -> WebhookNotification {
    WebhookNotification {
        status,
        tx_id: tx_id.to_string(),
        merchant_uid: merchant_uid.to_string(),
    }
}

fn seeded_schedule(ctx: &ChargeContext, status: ScheduleStatus) -> PaymentSchedule {
    PaymentSchedule {
        merchant_uid: ctx.merchant_uid.clone(),
        business_id: ctx.business_id.clone(),
        billing_plan: ctx.billing_plan,
        amount: ctx.amount,
        vat: ctx.vat,
        scheduled_date: bson::DateTime::now(),
        status,
        failures: Vec::new(),
        time_scheduled: bson::DateTime::now(),
        time_processed: None,
    }
}

#[tokio::test]
async fn duplicate_paid_notifications_settle_exactly_once() {
    let server = MockServer::start().await;
    let ctx = context("biz1", 1, ChargeKind::Initial);
    mount_payment(&server, "imp_1", "paid", None, &ctx).await;

    let store = Arc::new(MemoryStore::default());
    let handler =
        ReconciliationHandler::with_store(store.clone() as Arc<dyn SettlementStore>, gateway_for(&server));

    let n = notification(NotificationStatus::Paid, "imp_1", "biz1_ch1");
    handler.handle(&n).await.expect("first delivery");
    handler.handle(&n).await.expect("redelivery");

    // One ledger entry, the settled cycle-0 row, and exactly one forward
    // SCHEDULED row despite the redelivery.
    assert_eq!(store.transaction_count(), 1);
    assert_eq!(store.schedule_count(), 2);

    let settled = store.schedule("biz1_ch1");
    assert_eq!(settled.status, ScheduleStatus::Paid);
    assert!(settled.time_processed.is_some());

    let forward = store.schedule("biz1_ch2");
    assert_eq!(forward.status, ScheduleStatus::Scheduled);
    // Newest-first sorts on time_scheduled must place the forward row
    // ahead of the cycle it follows.
    assert!(forward.time_scheduled > settled.time_scheduled);
}

#[tokio::test]
async fn failed_notifications_prepend_failures_and_insert_no_forward_row() {
    let server = MockServer::start().await;
    let ctx = context("biz2", 3, ChargeKind::Scheduled);
    mount_payment(&server, "imp_2", "failed", Some("card_declined"), &ctx).await;

    let store = Arc::new(MemoryStore::default());
    store.seed_schedule(seeded_schedule(&ctx, ScheduleStatus::Scheduled));
    let handler =
        ReconciliationHandler::with_store(store.clone() as Arc<dyn SettlementStore>, gateway_for(&server));

    let n = notification(NotificationStatus::Failed, "imp_2", "biz2_ch3");
    handler.handle(&n).await.expect("first delivery");
    let after_one = store.schedule("biz2_ch3");
    assert_eq!(after_one.status, ScheduleStatus::Failed);
    assert_eq!(after_one.failures.len(), 1);
    assert_eq!(after_one.failures[0].reason, "card_declined");

    handler.handle(&n).await.expect("redelivery");
    let after_two = store.schedule("biz2_ch3");
    assert_eq!(after_two.failures.len(), 2);
    assert!(after_two.failures[0].timestamp >= after_two.failures[1].timestamp);

    // A failed cycle blocks progression: no forward schedule appears.
    assert_eq!(store.schedule_count(), 1);
    assert_eq!(store.transaction_count(), 0);
}

#[tokio::test]
async fn duplicate_cancelled_notifications_ledger_one_negative_entry() {
    let server = MockServer::start().await;
    let ctx = context("biz3", 1, ChargeKind::Scheduled);
    mount_payment(&server, "imp_3", "cancelled", None, &ctx).await;

    let store = Arc::new(MemoryStore::default());
    store.seed_schedule(seeded_schedule(&ctx, ScheduleStatus::Paid));
    let handler =
        ReconciliationHandler::with_store(store.clone() as Arc<dyn SettlementStore>, gateway_for(&server));

    let n = notification(NotificationStatus::Cancelled, "imp_3", "biz3_ch1");
    handler.handle(&n).await.expect("first delivery");
    handler.handle(&n).await.expect("redelivery");

    assert_eq!(store.transaction_count(), 1);
    let entry = store.transaction(&PaymentTransaction::ledger_id(
        "imp_3",
        &ctx.merchant_uid,
    ));
    assert_eq!(entry.amount, -40_000);
    assert_eq!(entry.status, TransactionStatus::Refunded);
    assert_eq!(store.schedule("biz3_ch1").status, ScheduleStatus::Refunded);
}

#[tokio::test]
async fn ready_notifications_touch_nothing() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::default());
    let handler =
        ReconciliationHandler::with_store(store.clone() as Arc<dyn SettlementStore>, gateway_for(&server));

    let n = notification(NotificationStatus::Ready, "imp_4", "biz4_ch1");
    handler.handle(&n).await.expect("ready is a no-op");
    assert_eq!(store.schedule_count(), 0);
    assert_eq!(store.transaction_count(), 0);
}
