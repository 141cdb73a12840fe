// ── Core error types ──
//
// User-facing errors from tillpoint-core. Consumers never see HTTP status
// codes or JSON parse failures directly; the `From<tillpoint_api::Error>`
// impl translates transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the store server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Live channel unavailable: {reason}")]
    LiveUnavailable { reason: String },

    #[error("Not logged in")]
    NotLoggedIn,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Checkout failed while trying to {step}: {message}")]
    Checkout { step: &'static str, message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Local state ──────────────────────────────────────────────────
    #[error("Profile storage error at {path}: {message}")]
    Storage { path: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The live channel or server could not be reached; retrying later may help.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::LiveUnavailable { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tillpoint_api::Error> for CoreError {
    fn from(err: tillpoint_api::Error) -> Self {
        use tillpoint_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Api { status: 404, message } => CoreError::NotFound {
                entity_type: "Resource".into(),
                identifier: message,
            },
            Api::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            Api::Discovery(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("service discovery failed: {reason}"),
            },
            Api::LiveConnect(reason) => CoreError::LiveUnavailable { reason },
            Api::NotConnected => CoreError::LiveUnavailable {
                reason: "not connected".into(),
            },
            Api::Superseded => CoreError::LiveUnavailable {
                reason: "connection attempt replaced by a newer one".into(),
            },
            Api::AttemptsExhausted { max } => CoreError::LiveUnavailable {
                reason: format!("gave up after {max} connection attempts"),
            },
            Api::Serialization(message) => CoreError::Internal(message),
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_api_errors_to_domain_errors() {
        let err: CoreError = tillpoint_api::Error::Api {
            status: 404,
            message: "Sale not found".into(),
        }
        .into();
        assert!(matches!(err, CoreError::NotFound { .. }));

        let err: CoreError = tillpoint_api::Error::Authentication {
            message: "Incorrect username or password".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Authentication failed: Incorrect username or password"
        );

        let err: CoreError = tillpoint_api::Error::AttemptsExhausted { max: 5 }.into();
        assert!(err.is_connectivity());
    }
}
