// Server status monitor against a wiremock backend.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tillpoint_api::{ApiClient, TransportConfig};
use tillpoint_core::{HealthMonitor, ServerStatus};

async fn setup() -> (MockServer, HealthMonitor) {
    let server = MockServer::start().await;
    let api = ApiClient::new(
        Url::parse(&server.uri()).unwrap(),
        &TransportConfig::default(),
    )
    .unwrap();
    (server, HealthMonitor::new(api))
}

async fn mount_health(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "status": "ok" })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn notifies_only_on_change() {
    let (server, monitor) = setup().await;
    mount_health(&server, 200).await;
    let mut rx = monitor.subscribe();

    assert_eq!(monitor.check().await, ServerStatus::Online);
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();

    assert_eq!(monitor.check().await, ServerStatus::Online);
    assert!(!rx.has_changed().unwrap());

    server.reset().await;
    mount_health(&server, 503).await;

    assert_eq!(monitor.check().await, ServerStatus::Offline);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), ServerStatus::Offline);
}

#[tokio::test]
async fn unreachable_server_is_offline() {
    let api = ApiClient::new(
        Url::parse("http://127.0.0.1:1").unwrap(),
        &TransportConfig::default(),
    )
    .unwrap();
    let monitor = HealthMonitor::new(api);

    assert_eq!(monitor.status(), ServerStatus::Unknown);
    assert_eq!(monitor.check().await, ServerStatus::Offline);
}

#[tokio::test]
async fn periodic_checks_stop_on_cancel() {
    let (server, monitor) = setup().await;
    mount_health(&server, 200).await;

    let cancel = CancellationToken::new();
    let handle = monitor.spawn(Duration::from_millis(20), cancel.clone());

    let mut rx = monitor.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| *s == ServerStatus::Online),
    )
    .await
    .unwrap()
    .unwrap();

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(server.received_requests().await.unwrap().len() >= 1);
}
