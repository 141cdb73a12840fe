// Checkout sequencing against a wiremock backend.
#![allow(clippy::unwrap_used)]

use serde_json::json;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tillpoint_api::{ApiClient, TransportConfig};
use tillpoint_core::{Cart, Checkout, CoreError};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Checkout) {
    let server = MockServer::start().await;
    let api = ApiClient::new(
        Url::parse(&server.uri()).unwrap(),
        &TransportConfig::default(),
    )
    .unwrap();
    (server, Checkout::new(api))
}

fn filled_cart() -> Cart {
    let mut cart = Cart::new();
    let espresso = Uuid::new_v4();
    cart.add(espresso, "Espresso", 2.5);
    cart.add(espresso, "Espresso", 2.5);
    cart.add(Uuid::new_v4(), "Croissant", 3.0);
    cart
}

async fn mount_sale(server: &MockServer, id: Uuid) {
    Mock::given(method("POST"))
        .and(path("/api/v1/sales/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "total_amount": 8.0,
            "timestamp": "2026-03-01T10:15:00Z",
            "receipt_number": "RCPT-20260301101500",
            "items": []
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_receipt(server: &MockServer, id: Uuid, number: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/sales/receipt/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "receipt_number": number,
            "cashier": "ada",
            "items": [],
            "total_amount": "8.00"
        })))
        .expect(1)
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn completes_sale_and_clears_cart() {
    let (server, checkout) = setup().await;
    let id = Uuid::new_v4();
    mount_sale(&server, id).await;
    mount_receipt(&server, id, "RCPT-20260301101500").await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sales/report/user-session/"))
        .and(query_param("report_type", "sales"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [],
            "summary": { "total_amount": 8.0, "total_sales": 1 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cart = filled_cart();
    let done = checkout.complete(&mut cart).await.unwrap();

    assert_eq!(done.sale.id, id);
    assert_eq!(done.receipt.receipt_number, "RCPT-20260301101500");
    assert_eq!(done.session.unwrap().total_sales(), 1);
    assert!(cart.is_empty());
}

#[tokio::test]
async fn empty_cart_never_reaches_the_server() {
    let (server, checkout) = setup().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut cart = Cart::new();
    let err = checkout.complete(&mut cart).await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationFailed { .. }));
}

#[tokio::test]
async fn failed_sale_keeps_the_cart() {
    let (server, checkout) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sales/create"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "detail": "No active session" })),
        )
        .mount(&server)
        .await;

    let mut cart = filled_cart();
    let err = checkout.complete(&mut cart).await.unwrap_err();

    match err {
        CoreError::Checkout { step, message } => {
            assert_eq!(step, "create the sale");
            assert!(message.contains("No active session"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(cart.len(), 2);
}

#[tokio::test]
async fn failed_receipt_keeps_the_cart() {
    let (server, checkout) = setup().await;
    let id = Uuid::new_v4();
    mount_sale(&server, id).await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/sales/receipt/{id}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut cart = filled_cart();
    let err = checkout.complete(&mut cart).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::Checkout {
            step: "fetch the receipt",
            ..
        }
    ));
    assert_eq!(cart.len(), 2);
}

#[tokio::test]
async fn receipt_without_number_is_rejected() {
    let (server, checkout) = setup().await;
    let id = Uuid::new_v4();
    mount_sale(&server, id).await;
    mount_receipt(&server, id, "").await;

    let mut cart = filled_cart();
    assert!(checkout.complete(&mut cart).await.is_err());
    assert!(!cart.is_empty());
}

#[tokio::test]
async fn missing_summary_does_not_fail_the_sale() {
    let (server, checkout) = setup().await;
    let id = Uuid::new_v4();
    mount_sale(&server, id).await;
    mount_receipt(&server, id, "RCPT-1").await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sales/report/user-session/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut cart = filled_cart();
    let done = checkout.complete(&mut cart).await.unwrap();

    assert!(done.session.is_none());
    assert!(cart.is_empty());
}
