//! Live channel: one WebSocket to the store server, with discovery-driven
//! endpoint selection, cookie authentication, heartbeats and a bounded
//! reconnect schedule.
//!
//! A [`LiveClient`] keeps at most one socket. Every `connect()` bumps a
//! socket generation and detaches whatever was there before, so late events
//! from a replaced socket are ignored instead of racing the new one.
//! Reconnects are decided by the shared [`RetryBudget`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::discovery::{DiscoveryClient, ServiceAdvertisement};
use crate::error::Error;
use crate::retry::{BudgetSnapshot, CloseReason, RetryBudget, RetryPolicy};
use crate::transport::cookie_header;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const NORMAL_CLOSE_CODE: u16 = 1000;
const NO_STATUS_CLOSE_CODE: u16 = 1005;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Configuration ────────────────────────────────────────────────────

/// Settings for the live channel.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Server origin. Its host and scheme build the fallback socket URL.
    pub server: Url,

    /// Port of the fallback socket URL. Default: 8000.
    pub live_port: u16,

    /// Budget for the discovery pass inside `connect()`. Default: 10s.
    pub discovery_timeout: Duration,

    /// Handshake deadline. Default: 10s.
    pub connect_timeout: Duration,

    /// Heartbeat period while authenticated. Default: 30s.
    pub ping_interval: Duration,

    pub retry: RetryPolicy,
}

impl LiveConfig {
    pub fn new(server: Url) -> Self {
        Self {
            server,
            live_port: 8000,
            discovery_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    fn secure(&self) -> bool {
        self.server.scheme() == "https"
    }

    fn socket_scheme(&self) -> &'static str {
        if self.secure() { "wss" } else { "ws" }
    }

    /// Fallback socket URL: `ws(s)://{server host}:{live_port}/ws`.
    pub fn default_url(&self) -> Result<Url, Error> {
        let host = self
            .server
            .host_str()
            .ok_or_else(|| Error::LiveConnect(format!("server URL has no host: {}", self.server)))?;
        let url = Url::parse(&format!(
            "{}://{host}:{}/ws",
            self.socket_scheme(),
            self.live_port
        ))?;
        Ok(url)
    }

    /// Socket URL for a discovered service: `ws(s)://{ip}:{port}/ws/{client_id}`.
    pub fn service_url(&self, service: &ServiceAdvertisement, client_id: &str) -> Result<Url, Error> {
        let host = if service.ip.contains(':') && !service.ip.starts_with('[') {
            format!("[{}]", service.ip)
        } else {
            service.ip.clone()
        };
        let url = Url::parse(&format!(
            "{}://{host}:{}/ws/{client_id}",
            self.socket_scheme(),
            service.port
        ))?;
        Ok(url)
    }
}

// ── State ────────────────────────────────────────────────────────────

/// Lifecycle of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Closing,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{
            Authenticated, Authenticating, Closing, Connected, Connecting, Disconnected,
        };
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Authenticating | Authenticated | Closing)
                | (Authenticating, Authenticated | Connected | Closing)
                | (Authenticated, Connected | Closing)
        )
    }

    /// A socket is open (authenticated or not).
    pub fn is_open(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Authenticating | Self::Authenticated
        )
    }

    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

// ── Messages ─────────────────────────────────────────────────────────

/// Frames the client originates itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Heartbeat; the server echoes the timestamp back in a `pong`.
    Ping { timestamp: i64 },
}

impl OutboundMessage {
    pub fn ping_now() -> Self {
        Self::Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Events published to subscribers.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// The server rejected the session cookie.
    AuthError { message: String },
    /// Any inbound message the client does not consume itself.
    Message(Arc<Value>),
    /// The current socket went away. `reconnecting` is false when the
    /// client has given up and only a new `connect()` will recover.
    Closed {
        close: CloseReason,
        reconnecting: bool,
    },
}

enum SocketCommand {
    Text(String),
    Close(CloseReason),
}

#[derive(Default)]
struct SocketSlot {
    generation: u64,
    cancel: Option<CancellationToken>,
    outbound: Option<mpsc::UnboundedSender<SocketCommand>>,
}

// ── LiveClient ───────────────────────────────────────────────────────

struct LiveInner {
    config: LiveConfig,
    client_id: String,
    discovery: Option<DiscoveryClient>,
    cookie_jar: Option<Arc<Jar>>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<LiveEvent>,
    budget: Mutex<RetryBudget>,
    socket: Mutex<SocketSlot>,
    reconnect_timer: Mutex<Option<(u64, CancellationToken)>>,
    timer_seq: AtomicU64,
    ping: Mutex<Option<CancellationToken>>,
}

/// Handle to the live channel. Cheap to clone; clones share one socket.
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<LiveInner>,
}

impl LiveClient {
    /// Create a client. Without a discovery client, `connect()` always uses
    /// [`LiveConfig::default_url`]. The cookie jar, if any, is the HTTP
    /// session's jar; its cookies ride on the WebSocket upgrade.
    pub fn new(
        config: LiveConfig,
        discovery: Option<DiscoveryClient>,
        cookie_jar: Option<Arc<Jar>>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let budget = RetryBudget::new(config.retry.clone());
        Self {
            inner: Arc::new(LiveInner {
                config,
                client_id: generate_client_id(),
                discovery,
                cookie_jar,
                state,
                events,
                budget: Mutex::new(budget),
                socket: Mutex::new(SocketSlot::default()),
                reconnect_timer: Mutex::new(None),
                timer_seq: AtomicU64::new(0),
                ping: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.inner.config
    }

    /// Identifier appended to discovered socket URLs, fixed for the
    /// client's lifetime.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn discovery(&self) -> Option<&DiscoveryClient> {
        self.inner.discovery.as_ref()
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state().is_open()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_state().is_authenticated()
    }

    /// Subscribe to live events. Slow consumers see `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.inner.events.subscribe()
    }

    pub fn budget(&self) -> BudgetSnapshot {
        lock(&self.inner.budget).snapshot()
    }

    pub fn record_initialization_failure(&self) -> u32 {
        lock(&self.inner.budget).record_initialization_failure()
    }

    pub fn may_retry_initialization(&self) -> bool {
        lock(&self.inner.budget).may_retry_initialization()
    }

    pub fn reset_initialization(&self) {
        lock(&self.inner.budget).reset_initialization();
    }

    /// Clear connection attempts, auth retries and the manual-disconnect
    /// flag so the next `connect()` starts with a full budget.
    pub fn reset_state(&self) {
        lock(&self.inner.budget).reset_connection();
        debug!("live retry budget reset");
    }

    /// A reconnect timer is armed and has not fired yet.
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.reconnect_timer).is_some()
    }

    // ── Connect ──────────────────────────────────────────────────────

    /// Open the live channel, replacing any existing socket.
    ///
    /// Resolves once the socket is open. Fails fast once the attempt budget
    /// is spent, with `Superseded` if a later `connect()` or `disconnect()`
    /// takes over before the handshake completes, and with the handshake
    /// error otherwise. A failed handshake is also treated as an abnormal
    /// close, which may arm a reconnect.
    pub async fn connect(&self) -> Result<(), Error> {
        let attempt = lock(&self.inner.budget)
            .begin_attempt()
            .inspect_err(|e| error!(error = %e, "not connecting live channel"))?;

        let url = self.resolve_url().await?;
        let request = self.build_request(&url)?;

        let cancel = CancellationToken::new();
        let generation = self.detach_socket(
            CloseReason::new(NORMAL_CLOSE_CODE, "replaced"),
            Some(cancel.clone()),
        );
        if self.current_state() != ConnectionState::Connecting {
            self.set_state(ConnectionState::Disconnected);
            self.set_state(ConnectionState::Connecting);
        }
        info!(url = %url, attempt, "connecting live channel");

        let timeout = self.inner.config.connect_timeout;
        let handshake = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request));
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(generation, "live connection attempt superseded");
                return Err(Error::Superseded);
            }
            result = handshake => result,
        };

        let socket = match result {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(e)) => {
                let err = Error::LiveConnect(e.to_string());
                warn!(error = %err, "live handshake failed");
                self.handle_close(generation, &CloseReason::abnormal(e.to_string()));
                return Err(err);
            }
            Err(_) => {
                warn!(timeout_ms = duration_ms(timeout), "live handshake timed out");
                self.handle_close(generation, &CloseReason::abnormal("connection timeout"));
                return Err(Error::Timeout {
                    timeout_ms: duration_ms(timeout),
                });
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        {
            let mut slot = lock(&self.inner.socket);
            if slot.generation != generation {
                return Err(Error::Superseded);
            }
            slot.outbound = Some(outbound_tx);
        }
        lock(&self.inner.budget).opened();
        self.set_state(ConnectionState::Connected);
        info!(url = %url, "live channel connected");

        tokio::spawn(socket_task(
            self.clone(),
            generation,
            socket,
            outbound_rx,
            cancel,
        ));
        Ok(())
    }

    async fn resolve_url(&self) -> Result<Url, Error> {
        if let Some(discovery) = &self.inner.discovery {
            let services = discovery
                .start_discovery(self.inner.config.discovery_timeout)
                .await;
            let chosen = discovery
                .selected_service()
                .and_then(|selected| services.iter().find(|s| s.id == selected.id).cloned())
                .or_else(|| {
                    services
                        .first()
                        .and_then(|first| discovery.select_service(&first.id))
                });
            if let Some(service) = chosen {
                debug!(service = service.label(), "using discovered live endpoint");
                return self.inner.config.service_url(&service, &self.inner.client_id);
            }
            info!("no services discovered, using default live endpoint");
        }
        self.inner.config.default_url()
    }

    fn build_request(&self, url: &Url) -> Result<ClientRequestBuilder, Error> {
        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::LiveConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(cookie) = self
            .inner
            .cookie_jar
            .as_deref()
            .and_then(|jar| cookie_header(jar, url))
        {
            request = request.with_header("Cookie", cookie);
        }
        Ok(request)
    }

    // ── Authentication & traffic ─────────────────────────────────────

    /// Mark the channel as awaiting authentication. The server reads the
    /// session cookies sent with the upgrade request and answers with
    /// `auth_success` or `auth_failed`; nothing is sent here.
    pub fn authenticate_from_cookies(&self) {
        if self.current_state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Authenticating);
        }
    }

    /// Serialize `data` as JSON and queue it on the open socket.
    pub fn send<T>(&self, data: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let Some(outbound) = lock(&self.inner.socket).outbound.clone() else {
            return Err(Error::NotConnected);
        };
        let text = serde_json::to_string(data).map_err(|e| Error::Serialization(e.to_string()))?;
        outbound
            .send(SocketCommand::Text(text))
            .map_err(|_| Error::NotConnected)
    }

    /// Close the socket with a normal close code and stop reconnecting.
    pub fn disconnect(&self) {
        self.disconnect_with(NORMAL_CLOSE_CODE, "");
    }

    /// Close the socket with `code` and `reason` and stop reconnecting
    /// until the next `connect()`.
    pub fn disconnect_with(&self, code: u16, reason: &str) {
        lock(&self.inner.budget).mark_manual_disconnect();
        if self.current_state().is_open() {
            self.set_state(ConnectionState::Closing);
        }
        self.detach_socket(CloseReason::new(code, reason), None);
        self.set_state(ConnectionState::Disconnected);
        info!(code, "live channel closed by client");
    }

    /// Send a heartbeat every `ping_interval` while authenticated.
    /// Replaces any running heartbeat.
    pub fn start_ping_interval(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.inner.ping).replace(token.clone()) {
            previous.cancel();
        }

        let client = self.clone();
        let period = self.inner.config.ping_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if client.is_authenticated() {
                            if let Err(e) = client.send(&OutboundMessage::ping_now()) {
                                warn!(error = %e, "failed to send heartbeat");
                            }
                        }
                    }
                }
            }
        });
        debug!(period_ms = duration_ms(period), "heartbeat started");
    }

    pub fn stop_ping_interval(&self) {
        if let Some(token) = lock(&self.inner.ping).take() {
            token.cancel();
            debug!("heartbeat stopped");
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn set_state(&self, next: ConnectionState) -> bool {
        let applied = self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                debug!(from = ?current, to = ?next, "ignoring live state transition");
                return false;
            }
            *current = next;
            true
        });
        if applied {
            debug!(state = ?next, "live state changed");
        }
        applied
    }

    /// Detach the current socket: close it with `close`, cancel its task
    /// and any pending handshake, and disarm timers. Installs `pending` as
    /// the cancel token of the new generation.
    fn detach_socket(&self, close: CloseReason, pending: Option<CancellationToken>) -> u64 {
        let (generation, outbound, cancel) = {
            let mut slot = lock(&self.inner.socket);
            slot.generation = slot.generation.wrapping_add(1);
            let outbound = slot.outbound.take();
            let cancel = std::mem::replace(&mut slot.cancel, pending);
            (slot.generation, outbound, cancel)
        };

        if let Some(outbound) = outbound {
            let _ = outbound.send(SocketCommand::Close(close));
        }
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.cancel_reconnect();
        self.stop_ping_interval();
        generation
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.inner.socket).generation == generation
    }

    fn handle_message(&self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to parse live message");
                return;
            }
        };

        match value.get("type").and_then(Value::as_str) {
            Some("auth_success") => {
                info!("live channel authenticated");
                self.set_state(ConnectionState::Authenticated);
            }
            Some("auth_failed") => {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Authentication failed")
                    .to_owned();
                let retries = lock(&self.inner.budget).record_auth_failure();
                error!(%message, retries, "live channel authentication failed");
                self.set_state(ConnectionState::Connected);
                let _ = self.inner.events.send(LiveEvent::AuthError { message });
            }
            Some("pong") => {
                if let Some(sent) = value.get("timestamp").and_then(Value::as_i64) {
                    let latency_ms = chrono::Utc::now().timestamp_millis() - sent;
                    debug!(latency_ms, "live channel pong");
                }
            }
            _ => {
                let _ = self.inner.events.send(LiveEvent::Message(Arc::new(value)));
            }
        }
    }

    fn handle_close(&self, generation: u64, close: &CloseReason) {
        {
            let mut slot = lock(&self.inner.socket);
            if slot.generation != generation {
                debug!(generation, "ignoring close from a detached socket");
                return;
            }
            slot.outbound = None;
            slot.cancel = None;
        }

        info!(code = close.code, reason = %close.reason, "live channel disconnected");
        self.stop_ping_interval();
        self.set_state(ConnectionState::Disconnected);

        let delay = lock(&self.inner.budget).reconnect_delay(close);
        let reconnecting = delay.is_some();
        match delay {
            Some(delay) => self.schedule_reconnect(delay),
            None => debug!(code = close.code, "not scheduling a reconnect"),
        }
        let _ = self.inner.events.send(LiveEvent::Closed {
            close: close.clone(),
            reconnecting,
        });
    }

    fn schedule_reconnect(&self, delay: Duration) {
        let token = CancellationToken::new();
        let id = self.inner.timer_seq.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = lock(&self.inner.reconnect_timer).replace((id, token.clone())) {
            previous.cancel();
        }
        info!(delay_ms = duration_ms(delay), "scheduling live reconnect");
        tokio::spawn(reconnect_after(self.clone(), id, delay, token));
    }

    fn cancel_reconnect(&self) {
        if let Some((_, token)) = lock(&self.inner.reconnect_timer).take() {
            token.cancel();
        }
    }

    fn take_reconnect_timer(&self, id: u64) {
        let mut timer = lock(&self.inner.reconnect_timer);
        if timer.as_ref().is_some_and(|(armed, _)| *armed == id) {
            timer.take();
        }
    }
}

async fn reconnect_after(client: LiveClient, id: u64, delay: Duration, cancel: CancellationToken) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(delay) => {}
    }
    client.take_reconnect_timer(id);
    if let Err(e) = client.connect().await {
        warn!(error = %e, "live reconnect failed");
    }
}

/// Pump one socket: write queued frames, read inbound frames, report the
/// close to the client when either side ends it.
async fn socket_task(
    client: LiveClient,
    generation: u64,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<SocketCommand>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = socket.split();

    let close = loop {
        tokio::select! {
            biased;
            command = outbound.recv() => match command {
                Some(SocketCommand::Text(text)) => {
                    if let Err(e) = write.send(Message::text(text)).await {
                        warn!(error = %e, "live send failed");
                        break CloseReason::abnormal(e.to_string());
                    }
                }
                Some(SocketCommand::Close(close)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(close.code),
                        reason: close.reason.clone().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break close;
                }
                None => break CloseReason::new(NORMAL_CLOSE_CODE, "client dropped"),
            },
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break CloseReason::new(NORMAL_CLOSE_CODE, "cancelled");
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => client.handle_message(generation, text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || CloseReason::new(NO_STATUS_CLOSE_CODE, ""),
                        |frame| CloseReason::new(u16::from(frame.code), frame.reason.as_str()),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "live channel error");
                    break CloseReason::abnormal(e.to_string());
                }
                None => break CloseReason::abnormal("stream ended"),
            },
        }
    };

    client.handle_close(generation, &close);
}

fn generate_client_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("client_{}", &simple[..9])
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────────
