pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

use services::{GatewayClient, ReconciliationHandler, SubscriptionService};
pub use startup::Application;

/// Shared application state, limited to what the handlers read.
#[derive(Clone)]
pub struct AppState {
    pub gateway: GatewayClient,
    pub subscriptions: SubscriptionService,
    pub reconciliation: ReconciliationHandler,
}
