//! Checkout request, restart and cancel routes

#[path = "../common/mod.rs"]
mod common;

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use common::*;
use paygate::config::RateLimitConfig;
use paygate::rate_limit::RateLimits;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn checkout_body() -> serde_json::Value {
    json!({
        "email": "user@example.com",
        "price": "19.99",
        "currency": "usd",
        "payment_type": "onetime",
        "metadata": {"title": "Pro Plan"},
        "callback_url": "https://shop.test/thanks",
        "on_success": {"action": "activate_plan", "plan_id": "pro"}
    })
}

async fn mock_paypal_order(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "ORDER-1",
            "links": [
                {"href": "https://api/self", "rel": "self"},
                {"href": "https://www.sandbox.paypal.com/checkoutnow?token=ORDER-1", "rel": "approve"}
            ]
        })))
        .expect(1)
        .mount(server)
        .await;
}

// ============ Authentication ============

#[tokio::test]
async fn test_request_requires_internal_key() {
    let state = create_test_app_state(Some("http://127.0.0.1:9"), None);

    let request = Request::builder()
        .method("POST")
        .uri("/payments/paypal/request")
        .header("Content-Type", "application/json")
        .body(Body::from(checkout_body().to_string()))
        .unwrap();
    let response = send(test_app(state.clone()), request).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/payments/paypal/request")
        .header("Content-Type", "application/json")
        .header("Authorization", "Bearer wrong-key")
        .body(Body::from(checkout_body().to_string()))
        .unwrap();
    let response = send(test_app(state), request).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_internal_routes_locked_without_key() {
    let mut state = create_test_app_state(Some("http://127.0.0.1:9"), None);
    state.internal_api_key = None;

    let response = send(
        test_app(state),
        internal_post("/payments/paypal/cancel", json!({"uref": "abc123"})),
    )
    .await;

    assert_status(&response, StatusCode::UNAUTHORIZED);
}

// ============ Create ============

#[tokio::test]
async fn test_create_paypal_checkout() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    mock_paypal_order(&server).await;
    let state = create_test_app_state(Some(&server.uri()), None);

    let response = send(
        test_app(state.clone()),
        internal_post("/payments/paypal/request", checkout_body()),
    )
    .await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], 1);
    assert_eq!(json["response"], "success");
    assert_eq!(
        json["redirect"],
        "https://www.sandbox.paypal.com/checkoutnow?token=ORDER-1"
    );

    let uref = json["uref"].as_str().expect("uref in response");
    let checkout = get_checkout(&state, uref);
    assert_eq!(checkout.price_minor, 1999);
    assert_eq!(checkout.currency, "USD");
    assert_eq!(checkout.plan_name(), "Pro Plan");
    assert_eq!(checkout.provider_order_id.as_deref(), Some("ORDER-1"));
    assert!(!checkout.paid);
}

#[tokio::test]
async fn test_create_stripe_checkout_with_numeric_price() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains("unit_amount%5D=1500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.com/c/pay/cs_test_1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_app_state(None, Some(&server.uri()));

    let mut body = checkout_body();
    body["price"] = json!(1500);
    body["currency"] = json!("JPY");
    let response = send(
        test_app(state),
        internal_post("/payments/stripe/request", body),
    )
    .await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], 1);
    assert_eq!(json["redirect"], "https://checkout.stripe.com/c/pay/cs_test_1");
}

#[tokio::test]
async fn test_provider_failure_redirects_to_cancel_url() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "name": "INTERNAL_SERVICE_ERROR",
            "message": "An internal service error has occurred."
        })))
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_app_state(Some(&server.uri()), None);

    let response = send(
        test_app(state.clone()),
        internal_post("/payments/paypal/request", checkout_body()),
    )
    .await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    let uref = json["uref"].as_str().unwrap().to_string();
    assert_eq!(json["status"], 0);
    assert!(
        json["response"]
            .as_str()
            .unwrap()
            .contains("An internal service error has occurred."),
        "got: {}",
        json["response"]
    );
    assert_eq!(
        json["redirect"],
        format!("https://shop.test/thanks?sxref={}&status=cancelled", uref)
    );

    // The checkout row stays, unpaid, for a later restart
    let checkout = get_checkout(&state, &uref);
    assert!(!checkout.paid);
    assert!(checkout.provider_order_id.is_none());
}

#[tokio::test]
async fn test_create_rejects_invalid_input() {
    let state = create_test_app_state(Some("http://127.0.0.1:9"), None);

    let cases = [
        ("currency", json!("dollars")),
        ("price", json!("19.999")),
        ("price", json!("-5")),
        ("price", json!("0")),
        ("price", json!("1000000000.00")),
        ("email", json!("not-an-email")),
        ("callback_url", json!("javascript:alert(1)")),
        ("callback_url", json!("https://")),
        ("callback_url", json!("ftp://shop.test/thanks")),
        ("callback_url", json!("/relative/thanks")),
        ("payment_type", json!("recurring")),
    ];

    for (field, value) in cases {
        let mut body = checkout_body();
        body[field] = value.clone();
        let response = send(
            test_app(state.clone()),
            internal_post("/payments/paypal/request", body),
        )
        .await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "{} = {} should be rejected",
            field,
            value
        );
    }
}

#[tokio::test]
async fn test_create_rejects_oversized_zero_decimal_price() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let state = create_test_app_state(None, Some(&server.uri()));

    let mut body = checkout_body();
    body["currency"] = json!("HUF");
    body["price"] = json!("900000000000000000");
    let response = send(
        test_app(state),
        internal_post("/payments/stripe/request", body),
    )
    .await;

    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_with_unconfigured_provider() {
    let state = create_test_app_state(Some("http://127.0.0.1:9"), None);

    let response = send(
        test_app(state),
        internal_post("/payments/stripe/request", checkout_body()),
    )
    .await;

    assert_status(&response, StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["details"], "Payment provider is not configured");
}

// ============ Restart ============

#[tokio::test]
async fn test_restart_unpaid_checkout() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    mock_paypal_order(&server).await;
    let state = create_test_app_state(Some(&server.uri()), None);
    {
        let conn = state.db.get().unwrap();
        create_abc123(&conn, PaymentProvider::PayPal);
    }

    let response = send(
        test_app(state.clone()),
        internal_get("/payments/paypal/request?uref=abc123"),
    )
    .await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["uref"], "abc123");
    assert_eq!(json["status"], 1);
    assert_eq!(
        get_checkout(&state, "abc123").provider_order_id.as_deref(),
        Some("ORDER-1")
    );
}

#[tokio::test]
async fn test_restart_paid_checkout_conflicts() {
    let state = create_test_app_state(Some("http://127.0.0.1:9"), None);
    {
        let conn = state.db.get().unwrap();
        create_abc123(&conn, PaymentProvider::PayPal);
        queries::try_mark_checkout_paid(&conn, "abc123").unwrap();
    }

    let response = send(
        test_app(state),
        internal_get("/payments/paypal/request?uref=abc123"),
    )
    .await;

    assert_status(&response, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_restart_with_other_provider() {
    let state = create_test_app_state(Some("http://127.0.0.1:9"), Some("http://127.0.0.1:9"));
    {
        let conn = state.db.get().unwrap();
        create_abc123(&conn, PaymentProvider::PayPal);
    }

    let response = send(
        test_app(state),
        internal_get("/payments/stripe/request?uref=abc123"),
    )
    .await;

    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_restart_unknown_checkout() {
    let state = create_test_app_state(Some("http://127.0.0.1:9"), None);

    let response = send(
        test_app(state),
        internal_get("/payments/paypal/request?uref=missing"),
    )
    .await;

    assert_status(&response, StatusCode::NOT_FOUND);
}

// ============ Cancel ============

#[tokio::test]
async fn test_cancel_subscription() {
    let server = MockServer::start().await;
    mock_paypal_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/subscriptions/I-SUB1/cancel"))
        .and(body_string_contains(r#""reason":"Cancelled by customer""#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_app_state(Some(&server.uri()), None);
    {
        let conn = state.db.get().unwrap();
        create_test_checkout(
            &conn,
            "sub1",
            &recurring_input(PaymentProvider::PayPal, CompletionAction::None),
        );
        queries::set_checkout_subscription(&conn, "sub1", "I-SUB1").unwrap();
        queries::try_mark_checkout_paid(&conn, "sub1").unwrap();
    }

    let response = send(
        test_app(state.clone()),
        internal_post("/payments/paypal/cancel", json!({"uref": "sub1"})),
    )
    .await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, json!({"uref": "sub1", "cancelled": true}));

    let checkout = get_checkout(&state, "sub1");
    assert!(checkout.cancelled_at.is_some());
    assert!(checkout.paid);
}

#[tokio::test]
async fn test_cancel_without_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/v1/subscriptions/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let state = create_test_app_state(None, Some(&server.uri()));
    {
        let conn = state.db.get().unwrap();
        create_abc123(&conn, PaymentProvider::Stripe);
    }

    let response = send(
        test_app(state.clone()),
        internal_post(
            "/payments/stripe/cancel",
            json!({"uref": "abc123", "reason": "Changed my mind"}),
        ),
    )
    .await;

    assert_status(&response, StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["cancelled"], false);
    assert!(get_checkout(&state, "abc123").cancelled_at.is_none());
}

#[tokio::test]
async fn test_cancel_provider_failure() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/subscriptions/sub_123"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "No such subscription: 'sub_123'"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_app_state(None, Some(&server.uri()));
    {
        let conn = state.db.get().unwrap();
        create_test_checkout(
            &conn,
            "sub1",
            &recurring_input(PaymentProvider::Stripe, CompletionAction::None),
        );
        queries::set_checkout_subscription(&conn, "sub1", "sub_123").unwrap();
    }

    let response = send(
        test_app(state.clone()),
        internal_post("/payments/stripe/cancel", json!({"uref": "sub1"})),
    )
    .await;

    assert_status(&response, StatusCode::BAD_GATEWAY);
    assert!(get_checkout(&state, "sub1").cancelled_at.is_none());
}

fn from_peer(mut request: Request<Body>) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40000))));
    request
}

#[tokio::test]
async fn test_internal_routes_are_not_rate_limited_per_ip() {
    let state = create_test_app_state(Some("http://127.0.0.1:9"), None);
    let limits = RateLimits::new(RateLimitConfig {
        standard_rpm: 1,
        relaxed_rpm: 1,
    });

    // The site builder calls from a single address for every tenant
    for _ in 0..5 {
        let request = internal_post(
            "/payments/paypal/cancel",
            json!({"uref": "sx_00000000000000000000000000000000"}),
        );
        let response = send(
            handlers::app(state.clone(), Some(limits.clone())),
            from_peer(request),
        )
        .await;
        assert_status(&response, StatusCode::NOT_FOUND);
    }

    // Public lookups from the same address still hit their budget
    let verify = || {
        from_peer(
            Request::builder()
                .uri("/payments/paypal/verify?sxref=sx_unknown")
                .body(Body::empty())
                .unwrap(),
        )
    };
    let first = send(handlers::app(state.clone(), Some(limits.clone())), verify()).await;
    assert_status(&first, StatusCode::NOT_FOUND);
    let second = send(handlers::app(state, Some(limits)), verify()).await;
    assert_status(&second, StatusCode::TOO_MANY_REQUESTS);
}
