use std::time::Duration;

use chrono::NaiveDate;
use secrecy::Secret;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subscription_service::config::GatewayConfig;
use subscription_service::error::BillingError;
use subscription_service::models::{BillingPlan, ChargeContext, ChargeKind, MerchantUid};
use subscription_service::services::gateway::{ChargeRequest, GatewayClient, RefundRequest};

fn gateway_for(server: &MockServer) -> GatewayClient {
    GatewayClient::new(GatewayConfig {
        key_id: "test_key".to_string(),
        key_secret: Secret::new("test_secret".to_string()),
        webhook_secret: Secret::new("whsec".to_string()),
        api_base_url: server.uri(),
        request_timeout: Duration::from_millis(500),
    })
}

fn charge_request() -> ChargeRequest {
    ChargeRequest {
        customer_uid: "biz42_4242".to_string(),
        merchant_uid: "biz42_ch3".to_string(),
        amount: 40_000,
        vat: 4_000,
        currency: "KRW".to_string(),
        name: "Subscription biz42 3/2 - 3/29 (4_WEEK)".to_string(),
        custom_data: String::new(),
    }
}

#[tokio::test]
async fn charge_returns_the_gateway_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscribe/payments/again"))
        .and(basic_auth("test_key", "test_secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tx_id": "imp_001",
            "merchant_uid": "biz42_ch3",
            "status": "ready"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = gateway_for(&server)
        .charge(&charge_request())
        .await
        .expect("charge should succeed");
    assert_eq!(ack.tx_id, "imp_001");
    assert_eq!(ack.merchant_uid, "biz42_ch3");
    assert_eq!(ack.status, "ready");
}

#[tokio::test]
async fn refund_posts_the_cancel_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments/cancel"))
        .and(basic_auth("test_key", "test_secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tx_id": "imp_002",
            "merchant_uid": "biz42_ch2",
            "status": "cancelled"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = gateway_for(&server)
        .refund(&RefundRequest {
            merchant_uid: "biz42_ch2".to_string(),
            amount: 2_286,
            reason: "subscription cancelled".to_string(),
        })
        .await
        .expect("refund should be acknowledged");
    assert_eq!(ack.status, "cancelled");
}

#[tokio::test]
async fn gateway_rejection_surfaces_code_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscribe/payments/again"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": "card_declined",
            "message": "insufficient funds"
        })))
        .mount(&server)
        .await;

    let error = gateway_for(&server)
        .charge(&charge_request())
        .await
        .expect_err("charge should be rejected");
    match error {
        BillingError::PaymentRequest { code, message } => {
            assert_eq!(code, "card_declined");
            assert_eq!(message, "insufficient funds");
        }
        other => panic!("expected PaymentRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_gateway_classifies_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscribe/payments/again"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(serde_json::json!({
                    "tx_id": "imp_late",
                    "merchant_uid": "biz42_ch3",
                    "status": "ready"
                })),
        )
        .mount(&server)
        .await;

    let error = gateway_for(&server)
        .charge(&charge_request())
        .await
        .expect_err("charge should time out");
    assert!(matches!(error, BillingError::RequestTimeout));
}

#[tokio::test]
async fn get_payment_round_trips_the_charge_context() {
    let context = ChargeContext {
        business_id: "biz42".to_string(),
        merchant_uid: MerchantUid::new("biz42", 3),
        customer_uid: "biz42_4242".to_string(),
        billing_plan: BillingPlan::FourWeek,
        cycle_start: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        amount: 40_000,
        vat: 4_000,
        kind: ChargeKind::Scheduled,
    };
    let custom_data = context.encode().expect("context should encode");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/imp_001"))
        .and(basic_auth("test_key", "test_secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tx_id": "imp_001",
            "merchant_uid": "biz42_ch3",
            "amount": 40_000,
            "currency": "KRW",
            "status": "paid",
            "custom_data": custom_data,
            "fail_reason": null,
            "paid_at": 1_772_409_600
        })))
        .mount(&server)
        .await;

    let payment = gateway_for(&server)
        .get_payment("imp_001")
        .await
        .expect("payment fetch should succeed");
    assert_eq!(payment.status, "paid");

    let decoded = ChargeContext::decode(&payment.custom_data).expect("context should decode");
    assert_eq!(decoded.merchant_uid.as_str(), "biz42_ch3");
    assert_eq!(decoded.billing_plan, BillingPlan::FourWeek);
    assert_eq!(decoded.kind, ChargeKind::Scheduled);
}

#[tokio::test]
async fn delete_method_calls_the_customer_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/subscribe/customers/biz42_4242"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    gateway_for(&server)
        .delete_method("biz42_4242")
        .await
        .expect("delete should succeed");
}

#[tokio::test]
async fn webhook_signature_must_match_the_body() {
    let server = MockServer::start().await;
    let gateway = gateway_for(&server);
    let body = r#"{"status":"paid","tx_id":"imp_001","merchant_uid":"biz42_ch3"}"#;

    // HMAC-SHA256 over the body with the configured secret.
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(b"whsec").expect("hmac key");
    mac.update(body.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    assert!(gateway
        .verify_webhook_signature(body, &signature)
        .expect("verification should run"));
    assert!(!gateway
        .verify_webhook_signature(body, "deadbeef")
        .expect("verification should run"));

    let notification = gateway.parse_notification(body).expect("valid payload");
    assert_eq!(notification.tx_id, "imp_001");
}
