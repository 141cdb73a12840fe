// ── Server status monitor ──
//
// Periodic `GET /health` probe. Watchers are notified only when the status
// actually changes.

use std::sync::Arc;
use std::time::Duration;

use tillpoint_api::ApiClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

struct MonitorInner {
    api: ApiClient,
    status: watch::Sender<ServerStatus>,
}

#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(api: ApiClient) -> Self {
        let (status, _) = watch::channel(ServerStatus::Unknown);
        Self {
            inner: Arc::new(MonitorInner { api, status }),
        }
    }

    pub fn status(&self) -> ServerStatus {
        *self.inner.status.borrow()
    }

    /// Receiver woken on every status change.
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.inner.status.subscribe()
    }

    /// Probe once and record the result.
    pub async fn check(&self) -> ServerStatus {
        let next = match self.inner.api.health().await {
            Ok(_) => ServerStatus::Online,
            Err(e) => {
                debug!(error = %e, "health probe failed");
                ServerStatus::Offline
            }
        };

        let changed = self.inner.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(status = %next, "server status changed");
        }
        next
    }

    /// Probe now and then every `interval` until `cancel` fires.
    pub fn spawn(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            loop {
                monitor.check().await;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!("health monitor stopped");
        })
    }
}
