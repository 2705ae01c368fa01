pub mod executor;
pub mod gateway;
pub mod metrics;
pub mod proration;
pub mod reconciliation;
pub mod repository;
pub mod scheduler;
pub mod subscription;

pub use executor::{ChargeOrder, PaymentExecutor};
pub use gateway::{GatewayClient, WebhookNotification};
pub use reconciliation::ReconciliationHandler;
pub use repository::{BillingRepository, SettlementStore};
pub use scheduler::SettlementScheduler;
pub use subscription::SubscriptionService;
