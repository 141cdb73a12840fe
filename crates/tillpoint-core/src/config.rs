// ── Runtime session configuration ──
//
// These types describe *how* to reach a store server and run the live
// channel. They never touch disk: the CLI builds a `SessionConfig` from its
// profile file and hands it in.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use tillpoint_api::{LiveConfig, RetryPolicy, TlsMode, TransportConfig};
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed store servers).
    DangerAcceptInvalid,
}

/// Everything a [`Session`](crate::Session) needs to run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Store server root (e.g. `http://10.0.0.5:8000`).
    pub server: Url,
    pub tls: TlsVerification,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Ask the discovery broker for live endpoints before connecting.
    pub use_discovery: bool,
    /// Budget for a discovery pass.
    pub discovery_timeout: Duration,
    /// Port of the fallback live endpoint.
    pub live_port: u16,
    /// Live handshake deadline.
    pub connect_timeout: Duration,
    /// Send heartbeats once the live channel is up.
    pub heartbeat: bool,
    pub ping_interval: Duration,
    pub retry: RetryPolicy,
    /// Pause after tearing down a live socket before reopening it.
    pub settle_delay: Duration,
    /// Pause between a manual disconnect and the redriven connect.
    pub reconnect_wait: Duration,
    /// Where the logged-in profile is persisted. `None` disables persistence.
    pub profile_path: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(server: Url) -> Self {
        Self {
            server,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            use_discovery: true,
            discovery_timeout: Duration::from_secs(5),
            live_port: 8000,
            connect_timeout: Duration::from_secs(10),
            heartbeat: true,
            ping_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            settle_delay: Duration::from_millis(500),
            reconnect_wait: Duration::from_secs(1),
            profile_path: None,
        }
    }

    /// HTTP transport sharing `jar` with the live channel.
    pub fn transport(&self, jar: Arc<Jar>) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
            cookie_jar: Some(jar),
        }
    }

    pub fn live_config(&self) -> LiveConfig {
        let mut live = LiveConfig::new(self.server.clone());
        live.live_port = self.live_port;
        live.discovery_timeout = self.discovery_timeout;
        live.connect_timeout = self.connect_timeout;
        live.ping_interval = self.ping_interval;
        live.retry = self.retry.clone();
        live
    }
}
