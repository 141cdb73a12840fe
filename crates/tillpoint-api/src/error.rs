use thiserror::Error;

/// Top-level error type for the `tillpoint-api` crate.
///
/// Covers every failure mode across the client surfaces: authentication,
/// HTTP transport, REST responses, service discovery and the live channel.
/// `tillpoint-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected or the session cookie was refused (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Operation timed out.
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST ────────────────────────────────────────────────────────
    /// Non-success status from the backend, with its `detail` text.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Discovery ───────────────────────────────────────────────────
    /// The discovery endpoint answered with something unusable.
    #[error("Service discovery failed: {0}")]
    Discovery(String),

    // ── Live channel ────────────────────────────────────────────────
    /// WebSocket handshake failed.
    #[error("Live connection failed: {0}")]
    LiveConnect(String),

    /// `send` on a client that has no open socket.
    #[error("Live connection is not open")]
    NotConnected,

    /// A newer `connect()` replaced this attempt before it opened.
    #[error("Connection attempt superseded by a newer one")]
    Superseded,

    /// The connection-attempt budget is spent.
    #[error("Maximum connection attempts reached ({max})")]
    AttemptsExhausted { max: u32 },

    // ── Data ────────────────────────────────────────────────────────
    /// An outbound payload could not be encoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates the session is gone
    /// and logging in again might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::LiveConnect(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}
