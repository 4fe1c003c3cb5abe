//! PayPal client: orders, subscriptions, capture, cancellation, token cache

#[path = "../common/mod.rs"]
mod common;

use common::*;
use paygate::error::AppError;
use paygate::payments::{CheckoutUrls, Gateway, TransmissionHeaders};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn urls() -> CheckoutUrls {
    CheckoutUrls {
        return_url: "http://localhost:3000/payments/paypal/verify?sxref=abc123".to_string(),
        cancel_url: "https://shop.test/thanks?sxref=abc123&status=cancelled".to_string(),
    }
}

#[tokio::test]
async fn test_order_payload_for_usd() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(header("authorization", "Bearer A21AA-test-token"))
        .and(body_string_contains(
            r#""custom_id":"abc123&onetime&&19.99&user@example.com""#,
        ))
        .and(body_string_contains(r#""value":"19.99""#))
        .and(body_string_contains(r#""currency_code":"USD""#))
        .and(body_string_contains(r#""intent":"CAPTURE""#))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "ORDER-1",
            "status": "CREATED",
            "links": [
                {"href": "https://api.sandbox.paypal.com/v2/checkout/orders/ORDER-1", "rel": "self"},
                {"href": "https://www.sandbox.paypal.com/checkoutnow?token=ORDER-1", "rel": "approve"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let conn = setup_test_db();
    let intent = create_abc123(&conn, PaymentProvider::PayPal);
    let client = paypal_test_client(&server.uri());

    let session = client.begin_checkout(&intent, &urls()).await.unwrap();

    assert_eq!(session.provider_ref, "ORDER-1");
    assert_eq!(
        session.approve_url,
        "https://www.sandbox.paypal.com/checkoutnow?token=ORDER-1"
    );
}

#[tokio::test]
async fn test_order_payload_for_zero_decimal_currency() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(body_string_contains(r#""value":"1500""#))
        .and(body_string_contains(r#""currency_code":"JPY""#))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "ORDER-JPY",
            "links": [
                {"href": "https://api/self", "rel": "self"},
                {"href": "https://paypal/approve-jpy", "rel": "approve"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let conn = setup_test_db();
    let mut input = one_time_input(PaymentProvider::PayPal, CompletionAction::None);
    input.price_minor = 1500;
    input.currency = "JPY".to_string();
    let intent = create_test_checkout(&conn, "jpy1", &input);

    let session = paypal_test_client(&server.uri())
        .begin_checkout(&intent, &urls())
        .await
        .unwrap();

    assert_eq!(session.approve_url, "https://paypal/approve-jpy");
}

#[tokio::test]
async fn test_subscription_creates_missing_product_then_plan() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/catalogs/products/[0-9a-f]{32}$"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "name": "RESOURCE_NOT_FOUND",
            "message": "The specified resource does not exist."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/catalogs/products"))
        .and(body_string_contains(r#""type":"SERVICE""#))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "PROD-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/plans"))
        .and(body_string_contains(r#""interval_unit":"DAY""#))
        .and(body_string_contains(r#""interval_count":30"#))
        .and(body_string_contains(r#""total_cycles":60"#))
        .and(body_string_contains(r#""value":"9.00""#))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "P-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/subscriptions"))
        .and(body_string_contains(r#""plan_id":"P-1""#))
        .and(body_string_contains(
            r#""custom_id":"sub1&recurring&monthly&9.00&user@example.com""#,
        ))
        .and(body_string_contains(r#""email_address":"user@example.com""#))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "I-SUB1",
            "status": "APPROVAL_PENDING",
            "links": [
                {"href": "https://www.sandbox.paypal.com/webapps/billing/subscriptions?ba_token=BA-1", "rel": "approve"},
                {"href": "https://api/self", "rel": "self"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let conn = setup_test_db();
    let intent = create_test_checkout(
        &conn,
        "sub1",
        &recurring_input(PaymentProvider::PayPal, CompletionAction::None),
    );

    let session = paypal_test_client(&server.uri())
        .begin_checkout(&intent, &urls())
        .await
        .unwrap();

    assert_eq!(session.provider_ref, "I-SUB1");
    assert!(session.approve_url.contains("ba_token=BA-1"));
}

/// Run a recurring checkout against a mock where the product already exists,
/// returning the subscription request body PayPal received.
async fn subscribe(frequency: Frequency, interval_count: u32, total_cycles: u32) -> serde_json::Value {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/catalogs/products/[0-9a-f]{32}$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "prod"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/plans"))
        .and(body_string_contains(format!(r#""interval_count":{}"#, interval_count)))
        .and(body_string_contains(format!(r#""total_cycles":{}"#, total_cycles)))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "P-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/subscriptions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "I-SUB1",
            "links": [{"href": "https://paypal/approve-sub", "rel": "approve"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let conn = setup_test_db();
    let mut input = recurring_input(PaymentProvider::PayPal, CompletionAction::None);
    input.frequency = Some(frequency);
    let intent = create_test_checkout(&conn, "sub1", &input);

    paypal_test_client(&server.uri())
        .begin_checkout(&intent, &urls())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = requests
        .iter()
        .find(|r| r.url.path() == "/v1/billing/subscriptions")
        .unwrap();
    serde_json::from_slice(&request.body).unwrap()
}

fn days_until(start_time: &str) -> i64 {
    let start = chrono::DateTime::parse_from_rfc3339(start_time).unwrap();
    let delta = start.with_timezone(&chrono::Utc) - chrono::Utc::now();
    // Round to whole days; the request was built moments ago
    (delta.num_seconds() + 3600) / 86400
}

#[tokio::test]
async fn test_monthly_subscription_starts_one_month_out() {
    let body = subscribe(Frequency::Monthly, 30, 60).await;
    assert_eq!(body["custom_id"], "sub1&recurring&monthly&9.00&user@example.com");
    assert_eq!(days_until(body["start_time"].as_str().unwrap()), 30);
}

#[tokio::test]
async fn test_annual_subscription_plan_and_start_time() {
    let body = subscribe(Frequency::Annually, 365, 5).await;
    assert_eq!(body["custom_id"], "sub1&recurring&annually&9.00&user@example.com");
    assert_eq!(days_until(body["start_time"].as_str().unwrap()), 365);
}

#[tokio::test]
async fn test_existing_product_is_reused() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/catalogs/products/prod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "prod-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/catalogs/products"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = paypal_test_client(&server.uri());
    client.ensure_product("prod-1", "Pro Plan").await.unwrap();
}

#[tokio::test]
async fn test_order_rejected_by_paypal() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "name": "UNPROCESSABLE_ENTITY",
            "message": "The requested action could not be performed.",
            "details": [{"issue": "CURRENCY_NOT_SUPPORTED", "description": "Currency code is not supported."}]
        })))
        .mount(&server)
        .await;

    let conn = setup_test_db();
    let intent = create_abc123(&conn, PaymentProvider::PayPal);

    let err = paypal_test_client(&server.uri())
        .begin_checkout(&intent, &urls())
        .await
        .unwrap_err();

    match err {
        AppError::Provider(message) => {
            assert!(message.contains("422"), "got: {}", message);
            assert!(message.contains("Currency code is not supported."), "got: {}", message);
        }
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_token_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Client Authentication failed"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let conn = setup_test_db();
    let intent = create_abc123(&conn, PaymentProvider::PayPal);

    let err = paypal_test_client(&server.uri())
        .begin_checkout(&intent, &urls())
        .await
        .unwrap_err();

    match err {
        AppError::Authentication(message) => {
            assert_eq!(message, "invalid_client Client Authentication failed")
        }
        other => panic!("expected authentication error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_token_fetched_once_across_calls() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/subscriptions/I-SUB1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "I-SUB1",
            "status": "ACTIVE",
            "custom_id": "sub1&recurring&monthly&9.00&"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let client = paypal_test_client(&server.uri());
    for _ in 0..3 {
        let subscription = client.get_subscription("I-SUB1").await.unwrap();
        assert_eq!(subscription.status, "ACTIVE");
        assert_eq!(
            subscription.custom_id.as_deref(),
            Some("sub1&recurring&monthly&9.00&")
        );
    }
}

#[tokio::test]
async fn test_rejected_token_is_fetched_again() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/subscriptions/I-SUB1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Token signature verification failed"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = paypal_test_client(&server.uri());
    for _ in 0..2 {
        let err = client.get_subscription("I-SUB1").await.unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
    }
}

#[tokio::test]
async fn test_capture_order() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/ORDER-1/capture"))
        .and(header("paypal-request-id", "capture-ORDER-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "ORDER-1",
            "status": "COMPLETED",
            "purchase_units": [{
                "reference_id": "abc123",
                "payments": {"captures": [{
                    "id": "CAP-1",
                    "status": "COMPLETED",
                    "custom_id": ABC123_CUSTOM
                }]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let captured = paypal_test_client(&server.uri())
        .capture_order("ORDER-1")
        .await
        .unwrap();

    assert_eq!(captured.status, "COMPLETED");
    assert_eq!(captured.custom_id(), Some(ABC123_CUSTOM));
}

#[tokio::test]
async fn test_cancel_subscription() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/subscriptions/I-SUB1/cancel"))
        .and(body_string_contains(r#""reason":"Too expensive""#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let conn = setup_test_db();
    create_test_checkout(
        &conn,
        "sub1",
        &recurring_input(PaymentProvider::PayPal, CompletionAction::None),
    );
    queries::set_checkout_subscription(&conn, "sub1", "I-SUB1").unwrap();
    let intent = queries::get_checkout_intent(&conn, "sub1").unwrap().unwrap();

    let client = paypal_test_client(&server.uri());
    let cancelled = Gateway::PayPal(&client)
        .cancel_subscription(&intent, "Too expensive")
        .await
        .unwrap();

    assert!(cancelled);
}

#[tokio::test]
async fn test_cancel_without_subscription_makes_no_call() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 0).await;
    Mock::given(method("POST"))
        .and(path_regex(r"/cancel$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let conn = setup_test_db();
    let intent = create_abc123(&conn, PaymentProvider::PayPal);

    let client = paypal_test_client(&server.uri());
    let cancelled = Gateway::PayPal(&client)
        .cancel_subscription(&intent, "Cancelled by customer")
        .await
        .unwrap();

    assert!(!cancelled);
}

#[tokio::test]
async fn test_verify_webhook_signature_without_webhook_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"verification_status": "SUCCESS"})),
        )
        .expect(0)
        .mount(&server)
        .await;

    let client = paypal_test_client(&server.uri());
    let headers = TransmissionHeaders {
        auth_algo: "SHA256withRSA".to_string(),
        cert_url: "https://api.paypal.com/cert".to_string(),
        transmission_id: "t-1".to_string(),
        transmission_sig: "sig".to_string(),
        transmission_time: "2026-01-01T00:00:00Z".to_string(),
    };

    let verified = client
        .verify_webhook_signature(&headers, &json!({"id": "WH-1"}))
        .await
        .unwrap();

    assert!(!verified, "no webhook id means nothing can be verified");
}

#[tokio::test]
async fn test_verify_webhook_signature_with_webhook_id() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .and(body_string_contains(r#""webhook_id":"WH-CONFIG-1""#))
        .and(body_string_contains(r#""transmission_id":"t-1""#))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"verification_status": "FAILURE"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = paypal_test_config(&server.uri());
    config.webhook_id = Some("WH-CONFIG-1".to_string());
    let client = PayPalClient::new(
        &config,
        reqwest::Client::new(),
        std::sync::Arc::new(TokenCache::new()),
    );
    let headers = TransmissionHeaders {
        auth_algo: "SHA256withRSA".to_string(),
        cert_url: "https://api.paypal.com/cert".to_string(),
        transmission_id: "t-1".to_string(),
        transmission_sig: "sig".to_string(),
        transmission_time: "2026-01-01T00:00:00Z".to_string(),
    };

    let verified = client
        .verify_webhook_signature(&headers, &json!({"id": "WH-1"}))
        .await
        .unwrap();

    assert!(!verified);
}
