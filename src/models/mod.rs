pub mod context;
pub mod merchant_uid;
pub mod payment_method;
pub mod plan;
pub mod schedule;
pub mod transaction;

pub use context::{ChargeContext, ChargeKind, CUSTOM_DATA_MAX_BYTES};
pub use merchant_uid::MerchantUid;
pub use payment_method::PaymentMethod;
pub use plan::BillingPlan;
pub use schedule::{FailureRecord, PaymentSchedule, ScheduleEvent, ScheduleStatus};
pub use transaction::{PaymentTransaction, TransactionStatus};
