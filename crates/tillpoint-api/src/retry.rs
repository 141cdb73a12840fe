//! Reconnect policy and the single retry budget shared by the live client
//! and the session that drives it.
//!
//! The live client owns one [`RetryBudget`]. Its own reconnect loop charges
//! connection attempts and auth failures against it; the session records
//! initialization failures into the same budget and reads it back, so there
//! is exactly one place that decides whether another attempt is allowed.

use std::time::Duration;

use crate::error::Error;

/// Close code the server uses for a terminal, do-not-retry disconnect.
pub const TERMINAL_CLOSE_CODE: u16 = 4000;

/// Close code reported when the socket dropped without a close frame
/// (failed or timed-out handshake, reset connection).
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

// ── RetryPolicy ──────────────────────────────────────────────────────

/// Exponential backoff and budget limits for the live connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first reconnect. Default: 5s.
    pub initial_delay: Duration,

    /// Growth factor between consecutive delays. Default: 1.5.
    pub multiplier: f64,

    /// Upper bound on any delay. Default: 30s.
    pub max_delay: Duration,

    /// Connection attempts allowed before `connect()` fails fast. Default: 5.
    pub max_connection_attempts: u32,

    /// `auth_failed` messages tolerated before reconnects stop. Default: 3.
    pub max_auth_retries: u32,

    /// Session-level initialization failures tolerated. Default: 3.
    pub max_initialization_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5_000),
            multiplier: 1.5,
            max_delay: Duration::from_millis(30_000),
            max_connection_attempts: 5,
            max_auth_retries: 3,
            max_initialization_failures: 3,
        }
    }
}

impl RetryPolicy {
    /// Reconnect delay after a close seen with `attempts` attempts on record.
    ///
    /// `delay = min(initial * multiplier^(attempts - 1), max)`. With zero
    /// attempts on record (the socket had opened and reset the counter) the
    /// exponent is -1, giving a slightly shorter first delay.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX).saturating_sub(1);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

// ── CloseReason ──────────────────────────────────────────────────────

/// Why the current socket went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close without a frame: handshake failure, timeout or reset.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSE_CODE, reason)
    }

    pub fn is_terminal(&self) -> bool {
        self.code == TERMINAL_CLOSE_CODE
    }
}

// ── RetryBudget ──────────────────────────────────────────────────────

/// Mutable counters charged against a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    connection_attempts: u32,
    auth_retries: u32,
    initialization_failures: u32,
    manual_disconnect: bool,
}

/// Read-only view of the budget, for status displays and the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BudgetSnapshot {
    pub connection_attempts: u32,
    pub auth_retries: u32,
    pub initialization_failures: u32,
    pub manual_disconnect: bool,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            connection_attempts: 0,
            auth_retries: 0,
            initialization_failures: 0,
            manual_disconnect: false,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            connection_attempts: self.connection_attempts,
            auth_retries: self.auth_retries,
            initialization_failures: self.initialization_failures,
            manual_disconnect: self.manual_disconnect,
        }
    }

    /// Start a connection attempt. Clears the manual-disconnect flag and
    /// charges one attempt; fails once the attempt limit is exceeded.
    pub fn begin_attempt(&mut self) -> Result<u32, Error> {
        self.manual_disconnect = false;
        self.connection_attempts = self.connection_attempts.saturating_add(1);
        if self.connection_attempts > self.policy.max_connection_attempts {
            return Err(Error::AttemptsExhausted {
                max: self.policy.max_connection_attempts,
            });
        }
        Ok(self.connection_attempts)
    }

    /// The socket opened: attempts start over.
    pub fn opened(&mut self) {
        self.connection_attempts = 0;
    }

    pub fn record_auth_failure(&mut self) -> u32 {
        self.auth_retries = self.auth_retries.saturating_add(1);
        self.auth_retries
    }

    pub fn mark_manual_disconnect(&mut self) {
        self.manual_disconnect = true;
    }

    /// Clear the connection-level counters and the manual flag.
    /// Initialization failures are owned by the session and survive this.
    pub fn reset_connection(&mut self) {
        self.manual_disconnect = false;
        self.connection_attempts = 0;
        self.auth_retries = 0;
    }

    /// Record one failed session initialization; returns the new total.
    pub fn record_initialization_failure(&mut self) -> u32 {
        self.initialization_failures = self.initialization_failures.saturating_add(1);
        self.initialization_failures
    }

    /// Whether the session may try one more initialization pass.
    pub fn may_retry_initialization(&self) -> bool {
        self.initialization_failures < self.policy.max_initialization_failures
    }

    pub fn reset_initialization(&mut self) {
        self.initialization_failures = 0;
    }

    /// Decide whether a close should schedule a reconnect, and after how long.
    pub fn reconnect_delay(&self, close: &CloseReason) -> Option<Duration> {
        if self.manual_disconnect
            || self.auth_retries >= self.policy.max_auth_retries
            || self.connection_attempts >= self.policy.max_connection_attempts
            || close.is_terminal()
        {
            return None;
        }
        Some(self.policy.delay_for(self.connection_attempts))
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
