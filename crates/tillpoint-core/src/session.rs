// ── Session ──
//
// Bridges the logged-in user and the live channel. Owns the HTTP client,
// the discovery client and the live client (all sharing one cookie jar),
// and runs a single lifecycle task that opens the live channel whenever a
// user is present and it is not already up.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use reqwest::cookie::Jar;
use secrecy::SecretString;
use tillpoint_api::discovery::ListenerId;
use tillpoint_api::rest::models::UserProfile;
use tillpoint_api::{
    ApiClient, ConnectionState, DiscoveryClient, DiscoveryConfig, DiscoveryEvent, LiveClient,
    LiveEvent, ServiceAdvertisement,
};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::profile::ProfileStore;

const NOTICE_CHANNEL_CAPACITY: usize = 64;

// ── Status surface ───────────────────────────────────────────────────

/// What a till header shows about the live channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveStatus {
    /// The lifecycle considers the channel up.
    pub initialized: bool,
    /// An initialization pass is running.
    pub initializing: bool,
    /// Services seen by the last discovery pass.
    pub discovered_services: Vec<ServiceAdvertisement>,
    pub connection: ConnectionState,
}

impl LiveStatus {
    pub fn label(&self) -> &'static str {
        if self.initializing {
            "Connecting..."
        } else if self.initialized && self.connection.is_open() {
            "Connected"
        } else if self.initialized {
            "Connecting..."
        } else {
            "Disconnected"
        }
    }

    /// Whether to offer a manual reconnect.
    pub fn can_reconnect(&self) -> bool {
        !self.initialized && !self.initializing
    }
}

/// User-facing notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    LoginFailed { message: String },
    LiveAuthError { message: String },
    ConnectionFailed,
    RetriesExhausted,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoginFailed { message } => write!(f, "Login failed: {message}"),
            Self::LiveAuthError { message } => write!(f, "Live connection rejected: {message}"),
            Self::ConnectionFailed => {
                f.write_str("Failed to establish connection. Please check your network.")
            }
            Self::RetriesExhausted => {
                f.write_str("Failed to connect after multiple attempts. Please try again later.")
            }
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────

struct SessionInner {
    config: SessionConfig,
    api: ApiClient,
    live: LiveClient,
    discovery: Option<DiscoveryClient>,
    profiles: Option<ProfileStore>,
    user: watch::Sender<Option<UserProfile>>,
    status: watch::Sender<LiveStatus>,
    notices: broadcast::Sender<Notice>,
    redrive: Notify,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    listener: Mutex<Option<ListenerId>>,
}

/// Handle to the session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build the HTTP, discovery and live clients around one cookie jar so
    /// the login cookies ride on the live upgrade request.
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let jar = Arc::new(Jar::default());
        let http = config.transport(Arc::clone(&jar)).build_client()?;
        let api = ApiClient::with_client(http.clone(), config.server.clone());

        let discovery = if config.use_discovery {
            let mut discovery_config = DiscoveryConfig::for_server(&config.server)?;
            discovery_config.default_timeout = config.discovery_timeout;
            Some(DiscoveryClient::new(http, discovery_config))
        } else {
            None
        };
        let live = LiveClient::new(config.live_config(), discovery, Some(jar));
        let profiles = config.profile_path.clone().map(ProfileStore::new);

        Ok(Self::from_parts(config, api, live, profiles))
    }

    /// Assemble a session from prebuilt clients. The discovery client, if
    /// any, is taken from `live`.
    pub fn from_parts(
        config: SessionConfig,
        api: ApiClient,
        live: LiveClient,
        profiles: Option<ProfileStore>,
    ) -> Self {
        let (user, _) = watch::channel(None);
        let (status, _) = watch::channel(LiveStatus::default());
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let discovery = live.discovery().cloned();

        let session = Self {
            inner: Arc::new(SessionInner {
                config,
                api,
                live,
                discovery,
                profiles,
                user,
                status,
                notices,
                redrive: Notify::new(),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                listener: Mutex::new(None),
            }),
        };

        if let Some(discovery) = &session.inner.discovery {
            let weak: Weak<SessionInner> = Arc::downgrade(&session.inner);
            let id = discovery.add_listener(move |event| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let DiscoveryEvent::ServiceFound(service) = event {
                    inner.status.send_if_modified(|status| {
                        if status.discovered_services.contains(service) {
                            false
                        } else {
                            status.discovered_services.push(service.clone());
                            true
                        }
                    });
                }
            });
            *lock(&session.inner.listener) = Some(id);
        }
        session
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn live(&self) -> &LiveClient {
        &self.inner.live
    }

    pub fn discovery(&self) -> Option<&DiscoveryClient> {
        self.inner.discovery.as_ref()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.user.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.user.borrow().is_some()
    }

    pub fn subscribe_user(&self) -> watch::Receiver<Option<UserProfile>> {
        self.inner.user.subscribe()
    }

    pub fn status(&self) -> LiveStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LiveStatus> {
        self.inner.status.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    // ── Authentication ───────────────────────────────────────────────

    /// Pick up a previous session: load the stored profile and confirm it
    /// against the server. A session the server no longer accepts is
    /// cleared locally.
    pub async fn restore(&self) -> Result<Option<UserProfile>, CoreError> {
        let stored = match &self.inner.profiles {
            Some(store) => store.load().unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable stored profile");
                None
            }),
            None => None,
        };
        let had_session = stored.is_some() || self.is_authenticated();

        match self.inner.api.me().await {
            Ok(user) => {
                self.persist(&user);
                info!(username = %user.username, "session restored");
                self.inner.user.send_replace(Some(user.clone()));
                Ok(Some(user))
            }
            Err(e) => {
                if had_session {
                    info!(error = %e, "stored session rejected, logging out locally");
                    self.clear_local();
                }
                if e.is_auth_expired() {
                    Ok(None)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<UserProfile, CoreError> {
        let user = match self.fetch_login(username, password).await {
            Ok(user) => user,
            Err(e) => {
                warn!(username, error = %e, "login failed");
                self.notify(Notice::LoginFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.inner.live.reset_initialization();
        self.persist(&user);
        info!(username = %user.username, "logged in");
        self.inner.user.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn fetch_login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<UserProfile, CoreError> {
        let response = self.inner.api.login(username, password).await?;
        match response.user {
            Some(user) => Ok(user),
            None => Ok(self.inner.api.me().await?),
        }
    }

    /// Close the live channel, end the server session and forget the user.
    /// The server call is best-effort.
    pub async fn logout(&self) {
        self.inner.live.disconnect();
        self.inner.status.send_modify(|status| {
            status.initialized = false;
            status.initializing = false;
        });
        if let Err(e) = self.inner.api.logout().await {
            warn!(error = %e, "server logout failed (non-fatal)");
        }
        self.clear_local();
        info!("logged out");
    }

    fn persist(&self, user: &UserProfile) {
        if let Some(store) = &self.inner.profiles {
            if let Err(e) = store.save(user) {
                warn!(error = %e, "failed to persist profile");
            }
        }
    }

    fn clear_local(&self) {
        if let Some(store) = &self.inner.profiles {
            if let Err(e) = store.clear() {
                warn!(error = %e, "failed to clear stored profile");
            }
        }
        self.inner.user.send_replace(None);
    }

    // ── Live lifecycle ───────────────────────────────────────────────

    /// Spawn the lifecycle task. Call once.
    pub fn start(&self) {
        let session = self.clone();
        let handle = tokio::spawn(async move { session.run_lifecycle().await });
        lock(&self.inner.tasks).push(handle);
    }

    /// Tear the live channel down and bring it back up with a fresh
    /// failure budget. Ignored while an initialization pass is running.
    pub async fn reconnect(&self) {
        if self.inner.status.borrow().initializing {
            debug!("reconnect ignored, initialization in progress");
            return;
        }
        info!("manual live reconnect");
        self.inner.live.disconnect();
        tokio::time::sleep(self.inner.config.reconnect_wait).await;
        self.inner.live.reset_initialization();
        self.inner
            .status
            .send_modify(|status| status.initialized = false);
        self.inner.redrive.notify_one();
    }

    /// Switch to a discovered service. Returns false when discovery is off
    /// or the id is unknown.
    pub fn select_service(&self, id: &str) -> bool {
        let Some(discovery) = &self.inner.discovery else {
            return false;
        };
        let Some(service) = discovery.select_service(id) else {
            return false;
        };
        info!(service = service.label(), "switching live service");
        if self.inner.live.is_connected() {
            self.inner.live.disconnect();
        }
        self.inner
            .status
            .send_modify(|status| status.initialized = false);
        self.inner.redrive.notify_one();
        true
    }

    /// Stop the lifecycle task and close the live channel.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = lock(&self.inner.tasks).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.live.disconnect();
        let listener = lock(&self.inner.listener).take();
        if let (Some(discovery), Some(id)) = (&self.inner.discovery, listener) {
            discovery.remove_listener(id);
        }
        debug!("session shut down");
    }

    async fn run_lifecycle(self) {
        let cancel = self.inner.cancel.clone();
        let mut user_rx = self.inner.user.subscribe();
        let mut state_rx = self.inner.live.state();
        let mut events = self.inner.live.subscribe();

        let mut last_state = *state_rx.borrow_and_update();
        let mut pending = user_rx.borrow_and_update().is_some();
        let mut retry_at: Option<Instant> = None;

        loop {
            if pending {
                pending = false;
                if self.should_initialize() {
                    retry_at = None;
                    if !self.initialize_live().await && self.may_redrive() {
                        retry_at = Some(Instant::now() + self.inner.config.retry.initial_delay);
                    }
                    last_state = *state_rx.borrow_and_update();
                    self.observe_connection(last_state);
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = user_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    pending = user_rx.borrow_and_update().is_some();
                    if !pending {
                        retry_at = None;
                    }
                }
                () = self.inner.redrive.notified() => pending = true,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    let rising = state.is_open() && !last_state.is_open();
                    last_state = state;
                    self.observe_connection(state);
                    if rising && self.on_live_opened() {
                        retry_at = None;
                    }
                }
                event = events.recv() => match event {
                    Ok(LiveEvent::AuthError { message }) => {
                        self.notify(Notice::LiveAuthError { message });
                        self.inner.status.send_modify(|status| status.initialized = false);
                        let failures = self.inner.live.record_initialization_failure();
                        if self.may_redrive() {
                            debug!(failures, "retrying live initialization after auth error");
                            retry_at = Some(Instant::now() + self.inner.config.retry.initial_delay);
                        }
                    }
                    Ok(LiveEvent::Closed { reconnecting: false, close }) => {
                        info!(code = close.code, "live channel will not reconnect on its own");
                        self.inner.status.send_modify(|status| status.initialized = false);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session lagged behind live events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                () = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    pending = self.may_redrive();
                }
            }
        }
        debug!("session lifecycle stopped");
    }

    fn should_initialize(&self) -> bool {
        let status = self.inner.status.borrow();
        self.is_authenticated()
            && !status.initialized
            && !status.initializing
            && self.inner.live.may_retry_initialization()
    }

    fn may_redrive(&self) -> bool {
        self.is_authenticated() && self.inner.live.may_retry_initialization()
    }

    /// Mirror the live state into the status. Only an authenticated
    /// channel clears the initialization failure count; an open socket the
    /// server then rejects still counts against it.
    fn observe_connection(&self, state: ConnectionState) {
        let changed = self.inner.status.send_if_modified(|status| {
            if status.connection == state {
                false
            } else {
                status.connection = state;
                true
            }
        });
        if changed && state.is_authenticated() {
            self.inner.live.reset_initialization();
        }
    }

    /// A socket came up outside an initialization pass (an automatic
    /// reconnect). Authenticate it and restart the heartbeat.
    fn on_live_opened(&self) -> bool {
        let status = self.status();
        if status.initializing || !self.is_authenticated() {
            return false;
        }
        if !status.initialized {
            info!("adopting live channel reopened by automatic reconnect");
            self.inner
                .status
                .send_modify(|status| status.initialized = true);
        }
        self.inner.live.authenticate_from_cookies();
        if self.inner.config.heartbeat {
            self.inner.live.start_ping_interval();
        }
        true
    }

    /// One initialization pass: discover, connect, authenticate; on failure
    /// refresh discovery and retry once if the failure budget allows.
    async fn initialize_live(&self) -> bool {
        let claimed = self.inner.status.send_if_modified(|status| {
            if status.initializing {
                false
            } else {
                status.initializing = true;
                true
            }
        });
        if !claimed {
            return false;
        }

        let live = &self.inner.live;
        if live.is_connected() {
            live.disconnect();
            tokio::time::sleep(self.inner.config.settle_delay).await;
        }

        if let Some(discovery) = &self.inner.discovery {
            let services = discovery
                .start_discovery(self.inner.config.discovery_timeout)
                .await;
            self.set_discovered(services);
        }

        live.reset_state();
        let ok = match self.open_live().await {
            Ok(()) => true,
            Err(e) => {
                let failures = live.record_initialization_failure();
                warn!(error = %e, failures, "live channel initialization failed");
                if !self.is_authenticated() {
                    false
                } else if live.may_retry_initialization() {
                    self.retry_initialization().await
                } else {
                    error!("live channel initialization retries exhausted");
                    self.notify(Notice::RetriesExhausted);
                    false
                }
            }
        };

        if ok {
            if self.inner.config.heartbeat {
                live.start_ping_interval();
            }
            info!("live channel initialized");
        }
        self.inner.status.send_modify(|status| {
            status.initializing = false;
            status.initialized = ok;
        });
        ok
    }

    async fn retry_initialization(&self) -> bool {
        let live = &self.inner.live;
        if let Some(discovery) = &self.inner.discovery {
            let services = discovery.force_refresh().await;
            self.set_discovered(services);
        }
        live.reset_state();
        match self.open_live().await {
            Ok(()) => true,
            Err(e) => {
                let failures = live.record_initialization_failure();
                error!(error = %e, failures, "live channel retry failed");
                if self.is_authenticated() {
                    self.notify(Notice::ConnectionFailed);
                }
                false
            }
        }
    }

    async fn open_live(&self) -> Result<(), CoreError> {
        self.inner.live.connect().await?;
        self.inner.live.authenticate_from_cookies();
        Ok(())
    }

    fn set_discovered(&self, services: Vec<ServiceAdvertisement>) {
        debug!(count = services.len(), "discovered live services");
        self.inner
            .status
            .send_modify(|status| status.discovered_services = services);
    }

    fn notify(&self, notice: Notice) {
        let _ = self.inner.notices.send(notice);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_follows_lifecycle() {
        let mut status = LiveStatus::default();
        assert_eq!(status.label(), "Disconnected");
        assert!(status.can_reconnect());

        status.initializing = true;
        assert_eq!(status.label(), "Connecting...");
        assert!(!status.can_reconnect());

        status.initializing = false;
        status.initialized = true;
        assert_eq!(status.label(), "Connecting...");

        status.connection = ConnectionState::Authenticated;
        assert_eq!(status.label(), "Connected");
        assert!(!status.can_reconnect());
    }

    #[test]
    fn notices_read_like_toasts() {
        assert_eq!(
            Notice::ConnectionFailed.to_string(),
            "Failed to establish connection. Please check your network."
        );
        assert_eq!(
            Notice::RetriesExhausted.to_string(),
            "Failed to connect after multiple attempts. Please try again later."
        );
    }
}
