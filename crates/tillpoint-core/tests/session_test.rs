// Session lifecycle against a wiremock backend and a local live server.
#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reqwest::cookie::Jar;
use tillpoint_api::discovery::DISCOVERY_PATH;
use tillpoint_api::{ApiClient, DiscoveryClient, DiscoveryConfig, LiveClient, RetryPolicy};
use tillpoint_core::{
    ConnectionState, CoreError, LiveStatus, Notice, ProfileStore, Session, SessionConfig,
};

// ── Live server ─────────────────────────────────────────────────────

#[derive(Default)]
struct Seen {
    accepted: AtomicUsize,
    cookies: Mutex<Vec<Option<String>>>,
}

/// Accepts sockets and greets each one with `greeting`.
async fn live_server(greeting: &'static str) -> (u16, Arc<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Seen::default());

    let server_seen = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let seen = Arc::clone(&server_seen);
            tokio::spawn(async move {
                let header_seen = Arc::clone(&seen);
                let callback =
                    move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        let cookie = req
                            .headers()
                            .get("cookie")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        header_seen.cookies.lock().unwrap().push(cookie);
                        Ok(resp)
                    };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                    return;
                };
                seen.accepted.fetch_add(1, Ordering::SeqCst);
                let _ = ws.send(Message::text(greeting)).await;
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_close() {
                        break;
                    }
                }
            });
        }
    });
    (port, seen)
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ── Helpers ─────────────────────────────────────────────────────────

fn user_json() -> Value {
    json!({
        "id": "7d1f3c9e-2b4a-4f6e-9c1d-3a5b7e9f1c2d",
        "username": "ada",
        "first_name": "Ada",
        "last_name": "Lovelace",
        "role": "cashier",
        "is_active": true
    })
}

fn session_config(
    server: &MockServer,
    live_port: u16,
    profile: Option<&ProfileStore>,
) -> SessionConfig {
    let mut config = SessionConfig::new(Url::parse(&server.uri()).unwrap());
    config.use_discovery = false;
    config.live_port = live_port;
    config.connect_timeout = Duration::from_secs(2);
    config.heartbeat = false;
    config.settle_delay = Duration::from_millis(20);
    config.reconnect_wait = Duration::from_millis(20);
    config.retry = RetryPolicy {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        ..RetryPolicy::default()
    };
    config.profile_path = profile.map(|store| store.path().to_path_buf());
    config
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/user/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "access_token=tok123; Path=/; HttpOnly")
                .set_body_json(json!({ "message": "Login successful", "user": user_json() })),
        )
        .mount(server)
        .await;
}

async fn wait_for_status<F>(session: &Session, check: F) -> LiveStatus
where
    F: Fn(&LiveStatus) -> bool,
{
    let mut rx = session.subscribe_status();
    let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| check(s)))
        .await
        .expect("timed out waiting for live status")
        .unwrap();
    status.clone()
}

async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}

async fn next_notice(rx: &mut broadcast::Receiver<Notice>) -> Notice {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a notice")
        .unwrap()
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn login_persists_profile_and_opens_live_channel() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let (port, seen) = live_server(r#"{"type":"auth_success"}"#).await;
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path().join("session.json"));

    let session = Session::new(session_config(&server, port, Some(&store))).unwrap();
    session.start();

    let user = session
        .login("ada", &SecretString::from("s3cret"))
        .await
        .unwrap();
    assert_eq!(user.display_name(), "Ada Lovelace");

    let status = wait_for_status(&session, |s| {
        s.initialized && s.connection == ConnectionState::Authenticated
    })
    .await;
    assert_eq!(status.label(), "Connected");
    assert!(!status.can_reconnect());

    assert_eq!(store.load().unwrap().unwrap().username, "ada");
    assert_eq!(seen.accepted.load(Ordering::SeqCst), 1);
    let cookies = seen.cookies.lock().unwrap().clone();
    assert_eq!(cookies[0].as_deref(), Some("access_token=tok123"));

    session.shutdown().await;
}

#[tokio::test]
async fn login_falls_back_to_me() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "message": "Login successful" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::new(session_config(&server, closed_port().await, None)).unwrap();
    let user = session
        .login("ada", &SecretString::from("s3cret"))
        .await
        .unwrap();

    assert_eq!(user.username, "ada");
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn rejected_login_raises_a_notice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/login"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "detail": "Incorrect username or password" })),
        )
        .mount(&server)
        .await;

    let session = Session::new(session_config(&server, closed_port().await, None)).unwrap();
    let mut notices = session.notices();

    let err = session
        .login("ada", &SecretString::from("wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    assert!(!session.is_authenticated());
    match next_notice(&mut notices).await {
        Notice::LoginFailed { message } => {
            assert!(message.contains("Incorrect username or password"), "{message}");
        }
        other => panic!("unexpected notice: {other:?}"),
    }
}

#[tokio::test]
async fn restore_confirms_stored_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path().join("session.json"));
    store
        .save(&serde_json::from_value(user_json()).unwrap())
        .unwrap();

    let session =
        Session::new(session_config(&server, closed_port().await, Some(&store))).unwrap();
    let user = session.restore().await.unwrap();

    assert_eq!(user.unwrap().username, "ada");
    assert_eq!(session.user().unwrap().username, "ada");
}

#[tokio::test]
async fn restore_clears_a_rejected_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/me"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Not authenticated" })),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path().join("session.json"));
    store
        .save(&serde_json::from_value(user_json()).unwrap())
        .unwrap();

    let session =
        Session::new(session_config(&server, closed_port().await, Some(&store))).unwrap();

    assert!(session.restore().await.unwrap().is_none());
    assert!(!session.is_authenticated());
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn logout_survives_server_failure() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let (port, _seen) = live_server(r#"{"type":"auth_success"}"#).await;
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path().join("session.json"));

    let session = Session::new(session_config(&server, port, Some(&store))).unwrap();
    session.start();
    session
        .login("ada", &SecretString::from("s3cret"))
        .await
        .unwrap();
    wait_for_status(&session, |s| s.initialized).await;

    session.logout().await;

    assert!(!session.is_authenticated());
    assert!(store.load().unwrap().is_none());
    assert_eq!(session.live().current_state(), ConnectionState::Disconnected);
    let status = wait_for_status(&session, |s| s.connection == ConnectionState::Disconnected).await;
    assert_eq!(status.label(), "Disconnected");

    session.shutdown().await;
}

// ── Live lifecycle ──────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_live_endpoint_raises_connection_failed() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    let session = Session::new(session_config(&server, closed_port().await, None)).unwrap();
    let mut notices = session.notices();
    session.start();
    session
        .login("ada", &SecretString::from("s3cret"))
        .await
        .unwrap();

    assert_eq!(next_notice(&mut notices).await, Notice::ConnectionFailed);
    let status = session.status();
    assert!(!status.initialized);

    session.shutdown().await;
}

#[tokio::test]
async fn live_auth_failure_raises_a_notice() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let (port, seen) = live_server(r#"{"type":"auth_failed","message":"Invalid token"}"#).await;

    let session = Session::new(session_config(&server, port, None)).unwrap();
    let mut notices = session.notices();
    session.start();
    session
        .login("ada", &SecretString::from("s3cret"))
        .await
        .unwrap();

    assert_eq!(
        next_notice(&mut notices).await,
        Notice::LiveAuthError {
            message: "Invalid token".into()
        }
    );

    // Every rejected socket counts as a failed initialization; the
    // lifecycle stops redriving once the budget is spent.
    let max = session.config().retry.max_initialization_failures;
    eventually(|| !session.live().may_retry_initialization()).await;
    eventually(|| seen.accepted.load(Ordering::SeqCst) == max as usize).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(seen.accepted.load(Ordering::SeqCst), max as usize);
    assert!(!session.status().initialized);

    session.shutdown().await;
}

#[tokio::test]
async fn manual_reconnect_opens_a_new_socket() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let (port, seen) = live_server(r#"{"type":"auth_success"}"#).await;

    let session = Session::new(session_config(&server, port, None)).unwrap();
    session.start();
    session
        .login("ada", &SecretString::from("s3cret"))
        .await
        .unwrap();
    wait_for_status(&session, |s| {
        s.initialized && s.connection == ConnectionState::Authenticated
    })
    .await;

    session.reconnect().await;

    wait_for_status(&session, |s| {
        s.initialized && s.connection == ConnectionState::Authenticated
    })
    .await;
    eventually(|| seen.accepted.load(Ordering::SeqCst) == 2).await;

    session.shutdown().await;
}

#[tokio::test]
async fn selecting_a_service_needs_discovery() {
    let server = MockServer::start().await;
    let session = Session::new(session_config(&server, closed_port().await, None)).unwrap();
    assert!(session.discovery().is_none());
    assert!(!session.select_service("store-1"));
}

#[tokio::test]
async fn switching_service_connects_to_the_chosen_one() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let (port_a, seen_a) = live_server(r#"{"type":"auth_success"}"#).await;
    let (port_b, seen_b) = live_server(r#"{"type":"auth_success"}"#).await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "a", "ip": "127.0.0.1", "port": port_a },
            { "id": "b", "ip": "127.0.0.1", "port": port_b }
        ])))
        .mount(&server)
        .await;

    let mut config = session_config(&server, closed_port().await, None);
    config.use_discovery = true;
    let jar = Arc::new(Jar::default());
    let http = config.transport(Arc::clone(&jar)).build_client().unwrap();
    let api = ApiClient::with_client(http.clone(), config.server.clone());
    // Every pass goes back to the broker, as it does once the cache is stale.
    let mut discovery_config = DiscoveryConfig::for_server(&config.server).unwrap();
    discovery_config.refresh_interval = Duration::ZERO;
    let discovery = DiscoveryClient::new(http, discovery_config);
    let live = LiveClient::new(config.live_config(), Some(discovery), Some(jar));
    let session = Session::from_parts(config, api, live, None);
    session.start();

    session
        .login("ada", &SecretString::from("s3cret"))
        .await
        .unwrap();
    wait_for_status(&session, |s| {
        s.initialized && s.connection == ConnectionState::Authenticated
    })
    .await;
    assert_eq!(seen_a.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.accepted.load(Ordering::SeqCst), 0);

    assert!(session.select_service("b"));
    eventually(|| seen_b.accepted.load(Ordering::SeqCst) == 1).await;
    wait_for_status(&session, |s| {
        s.initialized && s.connection == ConnectionState::Authenticated
    })
    .await;

    assert_eq!(seen_a.accepted.load(Ordering::SeqCst), 1);
    let selected = session.discovery().unwrap().selected_service().unwrap();
    assert_eq!(selected.id, "b");

    session.shutdown().await;
}
