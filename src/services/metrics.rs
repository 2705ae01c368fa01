//! Prometheus metrics for billing operations.

use once_cell::sync::OnceCell;
use prometheus::{
    histogram_opts, opts, register_histogram, register_int_counter_vec, Encoder, Histogram,
    IntCounterVec, TextEncoder,
};

/// Settlement sweeps by outcome ("completed" / "empty").
pub static SETTLEMENT_RUNS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// Charge requests issued, by call site and outcome.
pub static CHARGE_REQUESTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// Webhook notifications by gateway status.
pub static WEBHOOK_NOTIFICATIONS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// Wall time of one settlement sweep.
pub static SETTLEMENT_SWEEP_DURATION: OnceCell<Histogram> = OnceCell::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    SETTLEMENT_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_settlement_runs_total",
                "Daily settlement sweeps by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register SETTLEMENT_RUNS_TOTAL")
    });

    CHARGE_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_charge_requests_total",
                "Charge requests issued by call site and outcome"
            ),
            &["source", "outcome"]
        )
        .expect("Failed to register CHARGE_REQUESTS_TOTAL")
    });

    WEBHOOK_NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_webhook_notifications_total",
                "Gateway webhook notifications by status"
            ),
            &["status"]
        )
        .expect("Failed to register WEBHOOK_NOTIFICATIONS_TOTAL")
    });

    SETTLEMENT_SWEEP_DURATION.get_or_init(|| {
        register_histogram!(histogram_opts!(
            "billing_settlement_sweep_duration_seconds",
            "Duration of one settlement sweep",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ))
        .expect("Failed to register SETTLEMENT_SWEEP_DURATION")
    });
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

pub fn record_settlement_run(outcome: &str) {
    if let Some(counter) = SETTLEMENT_RUNS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_charge_request(source: &str, outcome: &str) {
    if let Some(counter) = CHARGE_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[source, outcome]).inc();
    }
}

pub fn record_webhook_notification(status: &str) {
    if let Some(counter) = WEBHOOK_NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn observe_sweep_duration(seconds: f64) {
    if let Some(histogram) = SETTLEMENT_SWEEP_DURATION.get() {
        histogram.observe(seconds);
    }
}
