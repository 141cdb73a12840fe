// Integration tests for `DiscoveryClient` against a wiremock broker.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tillpoint_api::discovery::DISCOVERY_PATH;
use tillpoint_api::{DiscoveryClient, DiscoveryConfig};

// ── Helpers ─────────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(2);

fn client(server: &MockServer, refresh_interval: Duration) -> DiscoveryClient {
    let mut config = DiscoveryConfig::for_server(&Url::parse(&server.uri()).unwrap()).unwrap();
    config.refresh_interval = refresh_interval;
    config.default_timeout = TIMEOUT;
    DiscoveryClient::new(reqwest::Client::new(), config)
}

fn services_body() -> serde_json::Value {
    json!([
        { "id": "till-1", "name": "Front till", "ip": "10.0.0.5", "port": 8000 },
        { "id": "till-2", "ip": "10.0.0.6", "port": "8001" },
        { "id": "", "ip": "10.0.0.7", "port": 8002 },
        { "id": "till-4", "ip": "10.0.0.8" }
    ])
}

async fn mount_services(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(services_body()))
        .expect(expected_calls)
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn keeps_only_complete_advertisements() {
    let server = MockServer::start().await;
    mount_services(&server, 1).await;
    let discovery = client(&server, Duration::from_secs(60));

    let services = discovery.start_discovery(TIMEOUT).await;

    let ids: Vec<_> = services.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["till-1", "till-2"]);
    assert_eq!(services[1].port, 8001);
}

#[tokio::test]
async fn fresh_cache_is_served_without_a_request() {
    let server = MockServer::start().await;
    mount_services(&server, 1).await;
    let discovery = client(&server, Duration::from_secs(60));

    let first = discovery.start_discovery(TIMEOUT).await;
    let second = discovery.start_discovery(TIMEOUT).await;

    assert_eq!(first, second);
    server.verify().await;
}

#[tokio::test]
async fn stale_cache_is_refreshed() {
    let server = MockServer::start().await;
    mount_services(&server, 2).await;
    let discovery = client(&server, Duration::from_millis(50));

    discovery.start_discovery(TIMEOUT).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    discovery.start_discovery(TIMEOUT).await;

    server.verify().await;
}

#[tokio::test]
async fn force_refresh_ignores_the_throttle() {
    let server = MockServer::start().await;
    mount_services(&server, 2).await;
    let discovery = client(&server, Duration::from_secs(60));

    discovery.start_discovery(TIMEOUT).await;
    let refreshed = discovery.force_refresh().await;

    assert_eq!(refreshed.len(), 2);
    server.verify().await;
}

#[tokio::test]
async fn concurrent_callers_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(services_body())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let discovery = client(&server, Duration::from_secs(60));

    let (a, b) = tokio::join!(
        discovery.start_discovery(TIMEOUT),
        discovery.start_discovery(TIMEOUT)
    );

    assert_eq!(a.len(), 2);
    assert_eq!(a, b);
    server.verify().await;
}

#[tokio::test]
async fn server_error_yields_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let discovery = client(&server, Duration::from_secs(60));

    assert!(discovery.start_discovery(TIMEOUT).await.is_empty());
}

#[tokio::test]
async fn non_json_reply_yields_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>captive portal</html>", "text/html"),
        )
        .mount(&server)
        .await;
    let discovery = client(&server, Duration::from_secs(60));

    assert!(discovery.start_discovery(TIMEOUT).await.is_empty());
}

#[tokio::test]
async fn timed_out_fetch_never_updates_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(services_body())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let discovery = client(&server, Duration::from_secs(60));

    let services = discovery.start_discovery(Duration::from_millis(50)).await;
    assert!(services.is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(discovery.services().is_empty());
}

#[tokio::test]
async fn refresh_keeps_selection_still_advertised() {
    let server = MockServer::start().await;
    mount_services(&server, 2).await;
    let discovery = client(&server, Duration::from_secs(60));

    discovery.start_discovery(TIMEOUT).await;
    assert!(discovery.select_service("till-2").is_some());

    discovery.force_refresh().await;
    assert_eq!(discovery.selected_service().unwrap().id, "till-2");
}

#[tokio::test]
async fn refresh_drops_selection_that_disappeared() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(services_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "till-1", "ip": "10.0.0.5", "port": 8000 }
        ])))
        .mount(&server)
        .await;
    let discovery = client(&server, Duration::from_secs(60));

    discovery.start_discovery(TIMEOUT).await;
    assert!(discovery.select_service("till-2").is_some());

    let services = discovery.force_refresh().await;
    assert_eq!(services.len(), 1);
    assert!(discovery.selected_service().is_none());
}

#[tokio::test]
async fn stop_discovery_ends_an_in_flight_pass() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(services_body())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    // A zero refresh interval makes every call go to the broker.
    let discovery = client(&server, Duration::ZERO);
    discovery.seed(&[json!({ "id": "seeded", "ip": "10.0.0.9", "port": 8000 })]);

    let runner = {
        let discovery = discovery.clone();
        tokio::spawn(async move { discovery.start_discovery(Duration::from_secs(10)).await })
    };
    while !discovery.is_discovering() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let waiter = {
        let discovery = discovery.clone();
        tokio::spawn(async move { discovery.start_discovery(Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    discovery.stop_discovery();
    let ran = runner.await.unwrap();
    let waited = waiter.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    let ids = |services: Vec<tillpoint_api::ServiceAdvertisement>| -> Vec<String> {
        services.into_iter().map(|s| s.id).collect()
    };
    assert_eq!(ids(ran), ["seeded"]);
    assert_eq!(ids(waited), ["seeded"]);
    assert!(!discovery.is_discovering());
}
