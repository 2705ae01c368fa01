//! MongoDB repository for billing state.
//!
//! All schedule writes are single-document conditional updates whose status
//! filters come straight from the transition table
//! (`ScheduleEvent::allowed_sources`), so concurrent reconciliation and
//! redelivered webhooks can never move a schedule along an edge the table
//! does not list, and duplicates collapse to matched-count 0.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, to_document, Bson, DateTime};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument, UpdateOptions};
use mongodb::{Collection, Database, IndexModel};

use crate::error::BillingError;
use crate::models::{
    FailureRecord, MerchantUid, PaymentMethod, PaymentSchedule, PaymentTransaction, ScheduleEvent,
};

#[derive(Clone)]
pub struct BillingRepository {
    methods: Collection<PaymentMethod>,
    schedules: Collection<PaymentSchedule>,
    transactions: Collection<PaymentTransaction>,
}

impl BillingRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            methods: db.collection("payment-methods"),
            schedules: db.collection("payment-schedule"),
            transactions: db.collection("transactions"),
        }
    }

    /// Initialize indexes for the sweep and per-business lookups.
    pub async fn init_indexes(&self) -> Result<(), BillingError> {
        let due_index = IndexModel::builder()
            .keys(doc! { "status": 1, "scheduled_date": 1 })
            .options(IndexOptions::builder().name("due_schedule_idx".to_string()).build())
            .build();
        let business_index = IndexModel::builder()
            .keys(doc! { "business_id": 1, "time_scheduled": -1 })
            .options(
                IndexOptions::builder()
                    .name("business_schedule_idx".to_string())
                    .build(),
            )
            .build();
        self.schedules
            .create_indexes([due_index, business_index], None)
            .await?;

        let default_method_index = IndexModel::builder()
            .keys(doc! { "business_id": 1, "default_method": 1 })
            .options(
                IndexOptions::builder()
                    .name("business_default_method_idx".to_string())
                    .build(),
            )
            .build();
        self.methods.create_indexes([default_method_index], None).await?;

        let ledger_index = IndexModel::builder()
            .keys(doc! { "business_id": 1, "created_time": -1 })
            .options(
                IndexOptions::builder()
                    .name("business_ledger_idx".to_string())
                    .build(),
            )
            .build();
        self.transactions.create_indexes([ledger_index], None).await?;

        tracing::info!("billing indexes initialized");
        Ok(())
    }

    // =========================================================================
    // Payment methods
    // =========================================================================

    /// Register (or refresh) a payment method. Never touches the default
    /// flag of an existing method.
    pub async fn upsert_method(
        &self,
        business_id: &str,
        customer_uid: &str,
    ) -> Result<(), BillingError> {
        let now = DateTime::now();
        self.methods
            .update_one(
                doc! { "_id": customer_uid },
                doc! {
                    "$setOnInsert": {
                        "business_id": business_id,
                        "default_method": false,
                        "created_time": now,
                    },
                    "$set": { "updated_time": now },
                },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    pub async fn find_method(
        &self,
        customer_uid: &str,
    ) -> Result<Option<PaymentMethod>, BillingError> {
        Ok(self.methods.find_one(doc! { "_id": customer_uid }, None).await?)
    }

    pub async fn delete_method(&self, customer_uid: &str) -> Result<bool, BillingError> {
        let result = self.methods.delete_one(doc! { "_id": customer_uid }, None).await?;
        Ok(result.deleted_count == 1)
    }

    pub async fn list_methods(&self, business_id: &str) -> Result<Vec<PaymentMethod>, BillingError> {
        let cursor = self
            .methods
            .find(doc! { "business_id": business_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn find_default_method(
        &self,
        business_id: &str,
    ) -> Result<Option<PaymentMethod>, BillingError> {
        Ok(self
            .methods
            .find_one(
                doc! { "business_id": business_id, "default_method": true },
                None,
            )
            .await?)
    }

    /// Unset-then-set sequencing keeps at most one default per business.
    /// Returns false when the named method does not exist.
    pub async fn set_default_method(
        &self,
        business_id: &str,
        customer_uid: &str,
    ) -> Result<bool, BillingError> {
        self.methods
            .update_many(
                doc! { "business_id": business_id, "default_method": true },
                doc! { "$set": { "default_method": false, "updated_time": DateTime::now() } },
                None,
            )
            .await?;
        let result = self
            .methods
            .update_one(
                doc! { "_id": customer_uid, "business_id": business_id },
                doc! { "$set": { "default_method": true, "updated_time": DateTime::now() } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    // =========================================================================
    // Schedules
    // =========================================================================

    /// Insert a schedule if no document with its merchant_uid exists.
    /// Returns false on a duplicate, which is the idempotency guard for
    /// redelivered notifications.
    pub async fn insert_schedule_if_absent(
        &self,
        schedule: &PaymentSchedule,
    ) -> Result<bool, BillingError> {
        let mut on_insert = to_document(schedule)?;
        on_insert.remove("_id");
        let result = self
            .schedules
            .update_one(
                doc! { "_id": schedule.merchant_uid.as_str() },
                doc! { "$setOnInsert": on_insert },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(result.upserted_id.is_some())
    }

    pub async fn find_schedule(
        &self,
        merchant_uid: &MerchantUid,
    ) -> Result<Option<PaymentSchedule>, BillingError> {
        Ok(self
            .schedules
            .find_one(doc! { "_id": merchant_uid.as_str() }, None)
            .await?)
    }

    /// Schedules due at or before the cutoff. Late records stay eligible.
    pub async fn find_due_schedules(
        &self,
        cutoff: DateTime,
    ) -> Result<Vec<PaymentSchedule>, BillingError> {
        let cursor = self
            .schedules
            .find(
                doc! { "status": "SCHEDULED", "scheduled_date": { "$lte": cutoff } },
                None,
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Most recent N schedules for a business, newest first.
    pub async fn latest_schedules(
        &self,
        business_id: &str,
        limit: i64,
    ) -> Result<Vec<PaymentSchedule>, BillingError> {
        let options = FindOptions::builder()
            .sort(doc! { "time_scheduled": -1 })
            .limit(limit)
            .build();
        let cursor = self
            .schedules
            .find(doc! { "business_id": business_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Highest charge sequence ever issued for a business.
    pub async fn latest_sequence(&self, business_id: &str) -> Result<Option<u64>, BillingError> {
        let latest = self.latest_schedules(business_id, 1).await?;
        Ok(latest.first().map(|s| s.merchant_uid.sequence()))
    }

    /// The business's single forward-looking record, if any.
    pub async fn find_active_schedule(
        &self,
        business_id: &str,
    ) -> Result<Option<PaymentSchedule>, BillingError> {
        Ok(self
            .schedules
            .find_one(
                doc! {
                    "business_id": business_id,
                    "status": { "$in": ["SCHEDULED", "FAILED", "PAUSED"] },
                },
                None,
            )
            .await?)
    }

    /// Conditionally transition a schedule. The filter is derived from the
    /// transition table; returns false when no document was in an allowed
    /// source state (duplicate delivery or lost race).
    pub async fn apply_event(
        &self,
        merchant_uid: &MerchantUid,
        event: ScheduleEvent,
    ) -> Result<bool, BillingError> {
        self.apply_event_with(merchant_uid, event, doc! {}).await
    }

    async fn apply_event_with(
        &self,
        merchant_uid: &MerchantUid,
        event: ScheduleEvent,
        mut extra_set: mongodb::bson::Document,
    ) -> Result<bool, BillingError> {
        extra_set.insert("status", event.target().as_str());
        let result = self
            .schedules
            .update_one(
                doc! {
                    "_id": merchant_uid.as_str(),
                    "status": { "$in": allowed_sources_bson(event) },
                },
                doc! { "$set": extra_set },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    /// SCHEDULED/FAILED → PAID, stamping the settlement time.
    pub async fn mark_paid(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: DateTime,
    ) -> Result<bool, BillingError> {
        self.apply_event_with(
            merchant_uid,
            ScheduleEvent::ChargePaid,
            doc! { "time_processed": processed_at },
        )
        .await
    }

    /// SCHEDULED/FAILED → FAILED, prepending the failure record so the
    /// history stays newest-first.
    pub async fn mark_failed(
        &self,
        merchant_uid: &MerchantUid,
        failure: &FailureRecord,
    ) -> Result<bool, BillingError> {
        let result = self
            .schedules
            .update_one(
                doc! {
                    "_id": merchant_uid.as_str(),
                    "status": { "$in": allowed_sources_bson(ScheduleEvent::ChargeFailed) },
                },
                doc! {
                    "$set": { "status": ScheduleEvent::ChargeFailed.target().as_str() },
                    "$push": { "failures": failure_prepend(failure)? },
                },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    /// Pause the business's SCHEDULED record, returning it post-update.
    pub async fn pause_active(
        &self,
        business_id: &str,
    ) -> Result<Option<PaymentSchedule>, BillingError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .schedules
            .find_one_and_update(
                doc! {
                    "business_id": business_id,
                    "status": { "$in": allowed_sources_bson(ScheduleEvent::Pause) },
                },
                doc! { "$set": { "status": ScheduleEvent::Pause.target().as_str() } },
                options,
            )
            .await?)
    }

    pub async fn find_paused_schedule(
        &self,
        business_id: &str,
    ) -> Result<Option<PaymentSchedule>, BillingError> {
        Ok(self
            .schedules
            .find_one(
                doc! { "business_id": business_id, "status": "PAUSED" },
                None,
            )
            .await?)
    }

    /// PAUSED → SCHEDULED, optionally rewriting the due date (late resume).
    pub async fn resume(
        &self,
        merchant_uid: &MerchantUid,
        new_scheduled_date: Option<DateTime>,
    ) -> Result<bool, BillingError> {
        let extra = match new_scheduled_date {
            Some(date) => doc! { "scheduled_date": date },
            None => doc! {},
        };
        self.apply_event_with(merchant_uid, ScheduleEvent::Resume, extra)
            .await
    }

    /// SCHEDULED/PAUSED → CANCELLED (stop future billing).
    pub async fn cancel_forward(&self, merchant_uid: &MerchantUid) -> Result<bool, BillingError> {
        self.apply_event(merchant_uid, ScheduleEvent::Cancel).await
    }

    /// PAID → REFUNDED, stamping the settlement time.
    pub async fn mark_refunded(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: DateTime,
    ) -> Result<bool, BillingError> {
        self.apply_event_with(
            merchant_uid,
            ScheduleEvent::RefundSettled,
            doc! { "time_processed": processed_at },
        )
        .await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Insert a ledger entry once per (gateway_tx_id, merchant_uid).
    /// Returns false when the entry already existed.
    pub async fn upsert_transaction(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<bool, BillingError> {
        let mut on_insert = to_document(transaction)?;
        on_insert.remove("_id");
        let result = self
            .transactions
            .update_one(
                doc! { "_id": &transaction.id },
                doc! { "$setOnInsert": on_insert },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(result.upserted_id.is_some())
    }

    pub async fn list_transactions(
        &self,
        business_id: &str,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, BillingError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_time": -1 })
            .limit(limit)
            .build();
        let cursor = self
            .transactions
            .find(doc! { "business_id": business_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

/// The storage operations reconciliation performs. Split from the concrete
/// repository so notification handling can be exercised against an
/// in-memory store honoring the same keyed/conditional contract.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn upsert_transaction(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<bool, BillingError>;

    async fn insert_schedule_if_absent(
        &self,
        schedule: &PaymentSchedule,
    ) -> Result<bool, BillingError>;

    async fn mark_paid(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: DateTime,
    ) -> Result<bool, BillingError>;

    async fn mark_failed(
        &self,
        merchant_uid: &MerchantUid,
        failure: &FailureRecord,
    ) -> Result<bool, BillingError>;

    async fn mark_refunded(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: DateTime,
    ) -> Result<bool, BillingError>;
}

#[async_trait]
impl SettlementStore for BillingRepository {
    async fn upsert_transaction(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<bool, BillingError> {
        BillingRepository::upsert_transaction(self, transaction).await
    }

    async fn insert_schedule_if_absent(
        &self,
        schedule: &PaymentSchedule,
    ) -> Result<bool, BillingError> {
        BillingRepository::insert_schedule_if_absent(self, schedule).await
    }

    async fn mark_paid(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: DateTime,
    ) -> Result<bool, BillingError> {
        BillingRepository::mark_paid(self, merchant_uid, processed_at).await
    }

    async fn mark_failed(
        &self,
        merchant_uid: &MerchantUid,
        failure: &FailureRecord,
    ) -> Result<bool, BillingError> {
        BillingRepository::mark_failed(self, merchant_uid, failure).await
    }

    async fn mark_refunded(
        &self,
        merchant_uid: &MerchantUid,
        processed_at: DateTime,
    ) -> Result<bool, BillingError> {
        BillingRepository::mark_refunded(self, merchant_uid, processed_at).await
    }
}

/// `$push` argument that keeps the failure history newest-first.
fn failure_prepend(failure: &FailureRecord) -> Result<mongodb::bson::Document, BillingError> {
    Ok(doc! {
        "$each": [to_bson(failure)?],
        "$position": 0,
    })
}

fn allowed_sources_bson(event: ScheduleEvent) -> Bson {
    Bson::Array(
        event
            .allowed_sources()
            .iter()
            .map(|s| Bson::String(s.as_str().to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleStatus;

    #[test]
    fn allowed_sources_filter_tracks_transition_table() {
        let bson = allowed_sources_bson(ScheduleEvent::ChargePaid);
        assert_eq!(
            bson,
            Bson::Array(vec![
                Bson::String("SCHEDULED".to_string()),
                Bson::String("FAILED".to_string()),
            ])
        );
        assert_eq!(ScheduleEvent::ChargePaid.target(), ScheduleStatus::Paid);
    }

    #[test]
    fn failures_are_prepended() {
        let failure = FailureRecord {
            reason: "card_declined".to_string(),
            timestamp: DateTime::now(),
        };
        let push = failure_prepend(&failure).unwrap();
        assert_eq!(push.get_i32("$position").unwrap(), 0);
        let entries = push.get_array("$each").unwrap();
        assert_eq!(entries.len(), 1);
    }
}
