use anyhow::{bail, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub billing: BillingConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Card-gateway credentials and endpoints.
#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    /// Bound on every gateway request. A timeout is an unknown outcome,
    /// not a failure.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

/// Billing-core knobs.
#[derive(Deserialize, Clone, Debug)]
pub struct BillingConfig {
    /// Local wall-clock hour of the daily settlement sweep.
    pub settlement_hour: u32,
    /// Fee retained on prorated refunds, as a fraction.
    pub refund_fee_percent: f64,
    pub currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BILLING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3010".to_string())
            .parse()?;

        let db_url = env::var("BILLING_DATABASE_URL")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let db_name =
            env::var("BILLING_DATABASE_NAME").unwrap_or_else(|_| "billing_db".to_string());

        let gateway = GatewayConfig {
            key_id: env::var("GATEWAY_KEY_ID").unwrap_or_default(),
            key_secret: Secret::new(env::var("GATEWAY_KEY_SECRET").unwrap_or_default()),
            webhook_secret: Secret::new(env::var("GATEWAY_WEBHOOK_SECRET").unwrap_or_default()),
            api_base_url: env::var("GATEWAY_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.gateway.example".to_string()),
            request_timeout: Duration::from_secs(
                env::var("GATEWAY_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
            ),
        };

        let settlement_hour = env::var("BILLING_SETTLEMENT_HOUR")
            .unwrap_or_else(|_| "6".to_string())
            .parse()?;
        if settlement_hour >= 24 {
            bail!("BILLING_SETTLEMENT_HOUR must be a wall-clock hour (0-23)");
        }

        let refund_fee_percent = env::var("BILLING_REFUND_FEE_PERCENT")
            .unwrap_or_else(|_| "0.20".to_string())
            .parse()?;
        if !(0.0..1.0).contains(&refund_fee_percent) {
            bail!("BILLING_REFUND_FEE_PERCENT must be in [0, 1)");
        }

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            gateway,
            billing: BillingConfig {
                settlement_hour,
                refund_fee_percent,
                currency: env::var("BILLING_CURRENCY").unwrap_or_else(|_| "KRW".to_string()),
            },
            service_name: "subscription-service".to_string(),
        })
    }
}
