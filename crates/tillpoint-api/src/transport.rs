// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the discovery client share TLS, timeout and cookie
// settings through this module. The cookie jar is also read by the live
// client to forward the HTTP session into the WebSocket handshake.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use url::Url;

use crate::error::Error;

const USER_AGENT: &str = concat!("tillpoint/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-signed store servers).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub cookie_jar: Option<Arc<Jar>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            cookie_jar: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        if let Some(ref jar) = self.cookie_jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Create a config with a fresh cookie jar (for session auth).
    pub fn with_cookie_jar(mut self) -> Self {
        self.cookie_jar = Some(Arc::new(Jar::default()));
        self
    }
}

/// Render the jar's cookies for `url` as a `Cookie` header value.
///
/// Browsers attach session cookies to the WebSocket upgrade on their own;
/// a native client has to copy them over from the HTTP session.
pub fn cookie_header(jar: &Jar, url: &Url) -> Option<String> {
    // Cookies are scoped to http(s); map ws(s) onto the matching scheme.
    let mut lookup = url.clone();
    let http_scheme = match url.scheme() {
        "wss" => "https",
        "ws" => "http",
        other => other,
    };
    if lookup.scheme() != http_scheme && lookup.set_scheme(http_scheme).is_err() {
        return None;
    }

    jar.cookies(&lookup)
        .and_then(|value| value.to_str().ok().map(str::to_owned))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn cookie_header_maps_ws_scheme_to_http() {
        let jar = Jar::default();
        let origin = Url::parse("http://till.local:8000/api/v1/user/login").unwrap();
        jar.add_cookie_str("access_token=abc; Path=/", &origin);

        let ws = Url::parse("ws://till.local:8000/ws").unwrap();
        assert_eq!(cookie_header(&jar, &ws).as_deref(), Some("access_token=abc"));
    }

    #[test]
    fn cookie_header_is_none_for_other_hosts() {
        let jar = Jar::default();
        let origin = Url::parse("http://till.local:8000/").unwrap();
        jar.add_cookie_str("access_token=abc; Path=/", &origin);

        let ws = Url::parse("ws://elsewhere.local:8000/ws").unwrap();
        assert!(cookie_header(&jar, &ws).is_none());
    }

    #[test]
    fn builds_client_with_jar() {
        let config = TransportConfig::default().with_cookie_jar();
        assert!(config.cookie_jar.is_some());
        assert!(config.build_client().is_ok());
    }
}
