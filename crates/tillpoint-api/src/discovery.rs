//! Backend service discovery.
//!
//! Asks the store server's discovery broker (`GET /api/discover_services`)
//! for the same-network service advertisements it knows about, caches them
//! with a refresh throttle, and lets the caller pick one to connect to.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tillpoint_api::discovery::{DiscoveryClient, DiscoveryConfig};
//!
//! let discovery = DiscoveryClient::new(reqwest::Client::new(), DiscoveryConfig::for_server(&server_url)?);
//! let services = discovery.start_discovery(Duration::from_secs(5)).await;
//! if let Some(first) = services.first() {
//!     discovery.select_service(&first.id);
//! }
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;

/// Path of the discovery broker on the store server.
pub const DISCOVERY_PATH: &str = "/api/discover_services";

// ── ServiceAdvertisement ─────────────────────────────────────────────

/// A reachable backend endpoint, as advertised by the discovery broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAdvertisement {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub ip: String,
    pub port: u16,
}

impl ServiceAdvertisement {
    /// Validate one raw entry from the broker.
    ///
    /// Keeps the entry only when it is an object with a non-empty `id`
    /// (string or number), a non-empty `ip` and a non-zero `port` (number or
    /// numeric string). Anything else is dropped.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;

        let id = match obj.get("id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) if n.as_f64().is_some_and(|v| v != 0.0) => n.to_string(),
            _ => return None,
        };

        let ip = match obj.get("ip")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => return None,
        };

        let port = match obj.get("port")? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse::<u16>().ok(),
            _ => None,
        }
        .filter(|p| *p != 0)?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        Some(Self { id, name, ip, port })
    }

    /// Label for status displays: the name when advertised, else the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// ── Events & listeners ───────────────────────────────────────────────

/// Notifications delivered to discovery listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// One validated entry from a successful discovery pass.
    ServiceFound(ServiceAdvertisement),
    /// The caller picked a service.
    ServiceSelected(ServiceAdvertisement),
}

/// Handle returned by [`DiscoveryClient::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&DiscoveryEvent) + Send + Sync>;

// ── DiscoveryConfig ──────────────────────────────────────────────────

/// Where and how often to ask the broker.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Full URL of the broker endpoint.
    pub endpoint: Url,

    /// Results younger than this are served from cache. Default: 60s.
    pub refresh_interval: Duration,

    /// Timeout used by [`DiscoveryClient::force_refresh`]. Default: 5s.
    pub default_timeout: Duration,
}

impl DiscoveryConfig {
    /// Broker endpoint on the given server origin.
    pub fn for_server(server: &Url) -> Result<Self, Error> {
        Ok(Self {
            endpoint: server.join(DISCOVERY_PATH)?,
            refresh_interval: Duration::from_secs(60),
            default_timeout: Duration::from_secs(5),
        })
    }
}

// ── DiscoveryClient ──────────────────────────────────────────────────

#[derive(Default)]
struct DiscoveryState {
    services: IndexMap<String, ServiceAdvertisement>,
    selected: Option<ServiceAdvertisement>,
    last_discovery: Option<Instant>,
}

struct DiscoveryInner {
    http: reqwest::Client,
    config: DiscoveryConfig,
    state: Mutex<DiscoveryState>,
    /// `true` while a broker request is in flight.
    active: watch::Sender<bool>,
    /// Cancels the in-flight request, if any.
    run_cancel: Mutex<Option<CancellationToken>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

/// Cache of backend service advertisements with at most one broker request
/// in flight.
///
/// Cheaply cloneable; clones share the cache, selection and listeners.
#[derive(Clone)]
pub struct DiscoveryClient {
    inner: Arc<DiscoveryInner>,
}

impl DiscoveryClient {
    pub fn new(http: reqwest::Client, config: DiscoveryConfig) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            inner: Arc::new(DiscoveryInner {
                http,
                config,
                state: Mutex::new(DiscoveryState::default()),
                active,
                run_cancel: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    /// Discover services, serving a fresh cache when there is one.
    ///
    /// Never fails: transport errors, bad status codes and non-JSON replies
    /// are logged and the current cache is returned. When `timeout` elapses
    /// first, the request is dropped and the cache is returned untouched.
    pub async fn start_discovery(&self, timeout: Duration) -> Vec<ServiceAdvertisement> {
        if let Some(cached) = self.fresh_cache() {
            debug!(count = cached.len(), "serving cached discovery results");
            return cached;
        }

        let claimed = self.inner.active.send_if_modified(|active| {
            if *active {
                false
            } else {
                *active = true;
                true
            }
        });

        if !claimed {
            debug!("discovery already in flight, waiting for it");
            let mut rx = self.inner.active.subscribe();
            let _ = rx.wait_for(|active| !*active).await;
            return self.services();
        }

        let _run = RunGuard::new(&self.inner);
        let cancel = CancellationToken::new();
        *lock(&self.inner.run_cancel) = Some(cancel.clone());

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("discovery stopped before completion");
                None
            }
            res = tokio::time::timeout(timeout, self.fetch()) => Some(res),
        };

        match outcome {
            Some(Ok(Ok(raw))) => self.apply(&raw),
            Some(Ok(Err(e))) => warn!(error = %e, "service discovery failed"),
            Some(Err(_)) => warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "service discovery timed out, using cached results"
            ),
            None => {}
        }

        self.services()
    }

    /// Cancel the in-flight discovery, if any. Waiting callers get the
    /// current cache.
    pub fn stop_discovery(&self) {
        if let Some(cancel) = lock(&self.inner.run_cancel).take() {
            cancel.cancel();
        }
    }

    /// Whether a broker request is in flight.
    pub fn is_discovering(&self) -> bool {
        *self.inner.active.borrow()
    }

    /// Forget the refresh throttle and discover again.
    pub async fn force_refresh(&self) -> Vec<ServiceAdvertisement> {
        lock(&self.inner.state).last_discovery = None;
        self.start_discovery(self.inner.config.default_timeout).await
    }

    /// Snapshot of the cache, in broker order.
    pub fn services(&self) -> Vec<ServiceAdvertisement> {
        lock(&self.inner.state).services.values().cloned().collect()
    }

    /// Select a cached service by id. Returns `None` and changes nothing
    /// when the id is unknown.
    pub fn select_service(&self, id: &str) -> Option<ServiceAdvertisement> {
        let selected = {
            let mut state = lock(&self.inner.state);
            let service = state.services.get(id)?.clone();
            state.selected = Some(service.clone());
            service
        };

        info!(id = %selected.id, ip = %selected.ip, port = selected.port, "service selected");
        self.notify(&DiscoveryEvent::ServiceSelected(selected.clone()));
        Some(selected)
    }

    pub fn selected_service(&self) -> Option<ServiceAdvertisement> {
        lock(&self.inner.state).selected.clone()
    }

    /// Load advertisements without asking the broker.
    ///
    /// Applies the same validation and events as a real discovery pass;
    /// intended for development setups and tests.
    pub fn seed(&self, raw: &[Value]) -> Vec<ServiceAdvertisement> {
        self.apply(&Value::Array(raw.to_vec()));
        self.services()
    }

    /// Register a listener. Listeners run synchronously, in registration
    /// order, on the task that produced the event.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DiscoveryEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    // ── Internals ────────────────────────────────────────────────────

    fn fresh_cache(&self) -> Option<Vec<ServiceAdvertisement>> {
        let state = lock(&self.inner.state);
        let last = state.last_discovery?;
        if state.services.is_empty() || last.elapsed() >= self.inner.config.refresh_interval {
            return None;
        }
        Some(state.services.values().cloned().collect())
    }

    async fn fetch(&self) -> Result<Value, Error> {
        let url = self.inner.config.endpoint.clone();
        debug!("GET {}", url);

        let resp = self.inner.http.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Discovery(format!("HTTP error {status}")));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type.contains("application/json") {
            return Err(Error::Discovery(format!(
                "invalid content type: {content_type:?}"
            )));
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// Replace the cache with the valid entries of `raw`.
    fn apply(&self, raw: &Value) {
        let found: Vec<ServiceAdvertisement> = raw
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(ServiceAdvertisement::from_raw)
                    .collect()
            })
            .unwrap_or_default();

        {
            let mut state = lock(&self.inner.state);
            state.services.clear();
            for service in &found {
                state.services.insert(service.id.clone(), service.clone());
            }
            // A selection survives a refresh only while its id is still advertised.
            let kept = state
                .selected
                .take()
                .and_then(|selected| state.services.get(&selected.id).cloned());
            state.selected = kept;
            state.last_discovery = Some(Instant::now());
        }

        info!(count = found.len(), "service discovery complete");
        for service in found {
            self.notify(&DiscoveryEvent::ServiceFound(service));
        }
    }

    fn notify(&self, event: &DiscoveryEvent) {
        // Clone out so listeners may call back into the client.
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(?event, "discovery listener panicked");
            }
        }
    }
}

/// Clears the in-flight flag when a discovery run ends, even if the
/// caller's future is dropped mid-request.
struct RunGuard<'a> {
    inner: &'a DiscoveryInner,
}

impl<'a> RunGuard<'a> {
    fn new(inner: &'a DiscoveryInner) -> Self {
        Self { inner }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.run_cancel).take();
        self.inner.active.send_replace(false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────────
