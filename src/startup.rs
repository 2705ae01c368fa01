//! Application startup and lifecycle management.

use std::net::SocketAddr;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers;
use crate::services::{
    metrics::init_metrics, BillingRepository, GatewayClient, PaymentExecutor,
    ReconciliationHandler, SettlementScheduler, SubscriptionService,
};
use crate::AppState;

pub struct Application {
    port: u16,
    router: Router,
    scheduler: SettlementScheduler,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        init_metrics();

        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some(config.service_name.clone());
        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let repository = BillingRepository::new(&db);
        repository.init_indexes().await?;

        let gateway = GatewayClient::new(config.gateway.clone());
        if gateway.is_configured() {
            tracing::info!("payment gateway client initialized");
        } else {
            tracing::warn!("gateway credentials not configured - charges will be rejected");
        }

        let executor = PaymentExecutor::new(
            repository.clone(),
            gateway.clone(),
            config.billing.currency.clone(),
        );
        let subscriptions = SubscriptionService::new(
            repository.clone(),
            gateway.clone(),
            executor.clone(),
            config.billing.refund_fee_percent,
        );
        let reconciliation = ReconciliationHandler::new(repository.clone(), gateway.clone());
        let scheduler =
            SettlementScheduler::new(repository, executor, config.billing.settlement_hour);

        let state = AppState {
            gateway,
            subscriptions,
            reconciliation,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            // Subscription lifecycle
            .route("/subscriptions", post(handlers::billing::subscribe))
            .route(
                "/subscriptions/:business_id/pause",
                post(handlers::billing::pause),
            )
            .route(
                "/subscriptions/:business_id/resume",
                post(handlers::billing::resume),
            )
            .route(
                "/subscriptions/:business_id",
                delete(handlers::billing::cancel),
            )
            // Payment methods
            .route(
                "/payment-methods",
                post(handlers::billing::register_method),
            )
            .route(
                "/payment-methods/:business_id",
                get(handlers::billing::list_methods),
            )
            .route(
                "/payment-methods/:business_id/default",
                put(handlers::billing::set_default_method),
            )
            .route(
                "/payment-methods/:business_id/:last4",
                delete(handlers::billing::delete_method),
            )
            // History
            .route(
                "/businesses/:business_id/schedules",
                get(handlers::billing::schedule_history),
            )
            .route(
                "/businesses/:business_id/transactions",
                get(handlers::billing::transaction_history),
            )
            // Gateway callbacks
            .route("/webhooks/payments", post(handlers::webhook::gateway_webhook))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state);

        Ok(Self {
            port: config.server.port,
            router,
            scheduler,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve HTTP and run the settlement loop until interrupted. The loop
    /// is cancelled before the process exits so a sweep is never cut off
    /// mid-charge by an unrelated task death.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        let shutdown = CancellationToken::new();
        let scheduler_handle = tokio::spawn(self.scheduler.run(shutdown.clone()));

        let serve_shutdown = shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                serve_shutdown.cancel();
            })
            .await?;

        shutdown.cancel();
        scheduler_handle.await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => tracing::error!(%error, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
